/*
 * Copyright © 2024, United States Government, as represented by the Administrator of 
 * the National Aeronautics and Space Administration. All rights reserved.
 *
 * The “ODIN” software is licensed under the Apache License, Version 2.0 (the "License"); 
 * you may not use this file except in compliance with the License. You may obtain a copy 
 * of the License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software distributed under
 * the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
 * either express or implied. See the License for the specific language governing permissions
 * and limitations under the License.
 */
use std::{path::PathBuf, time::Duration};
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::webodm::TaskStatus;

pub type Result<T> = std::result::Result<T, OdinWebOdmError>;

#[derive(Error,Debug)]
pub enum OdinWebOdmError {

    #[error("{0} required")]
    MissingParam(String),

    #[error("{} required", .missing.join(", "))]
    MissingParams { missing: Vec<String>, received: Map<String,Value> },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("project not found: {name}")]
    ProjectNotFound { name: String, available: Vec<String> },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("map name not found in mappings: {name}")]
    MapNotFound { name: String, available: Vec<String> },

    #[error("{asset} not available for this task")]
    AssetUnavailable { asset: String, available: Vec<String> },

    #[error("task is not completed yet (status: {})", status_label(.status))]
    TaskNotReady { status: Option<TaskStatus> },

    #[error("upload limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("WebODM authentication failed: {details}")]
    AuthFailed { status: Option<u16>, details: String },

    #[error("WebODM request {url} failed with status {status}")]
    UpstreamStatus { url: String, status: u16, body: Value },

    #[error("unexpected WebODM response: {0}")]
    UnexpectedResponse(String),

    #[error("failed to download {url}: {details}")]
    DownloadFailed { url: String, details: String },

    #[error("failed to read map mappings {path:?}: {details}")]
    MappingsUnreadable { path: PathBuf, details: String },

    #[error("spatial index generation failed: {0}")]
    IndexFailed(String),

    #[error("spatial index generation timed out after {0:?}")]
    IndexTimeout(Duration),

    #[error("config error: {0}")]
    ConfigError(String),

    // pass through for reqwest errors that are not mapped to a specific category
    #[error("http error: {0}")]
    HttpError( #[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError( #[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError( #[from] serde_json::Error),

    #[error("RON deserialization error {0}")]
    RonDeError( #[from] ron::de::SpannedError),
}

fn status_label (status: &Option<TaskStatus>)->String {
    match status {
        Some(s) => format!("{} ({})", s.code(), s.label()),
        None => "none".to_string()
    }
}

/// the coarse error classes we report to HTTP clients
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Conflict,
    Limit,
    Upstream,
    Internal,
}

impl ErrorCategory {
    pub fn as_str (&self)->&'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Limit => "limit",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Internal => "internal",
        }
    }

    pub fn status_code (&self)->StatusCode {
        match self {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Limit => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCategory::Upstream | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl OdinWebOdmError {
    pub fn category (&self)->ErrorCategory {
        use OdinWebOdmError::*;
        match self {
            MissingParam(_) | MissingParams{..} | InvalidParam(_) => ErrorCategory::Validation,
            ProjectNotFound{..} | TaskNotFound(_) | MapNotFound{..} | AssetUnavailable{..} => ErrorCategory::NotFound,
            TaskNotReady{..} => ErrorCategory::Conflict,
            LimitExceeded(_) => ErrorCategory::Limit,
            AuthFailed{..} | UpstreamStatus{..} | UnexpectedResponse(_) | DownloadFailed{..} |
            IndexFailed(_) | IndexTimeout(_) | HttpError(_) => ErrorCategory::Upstream,
            MappingsUnreadable{..} | ConfigError(_) | IoError(_) | JsonError(_) | RonDeError(_) => ErrorCategory::Internal,
        }
    }

    /// machine readable error code (finer grained than the category)
    pub fn code (&self)->&'static str {
        use OdinWebOdmError::*;
        match self {
            MissingParam(_) | MissingParams{..} => "missing_parameter",
            InvalidParam(_) => "invalid_parameter",
            ProjectNotFound{..} => "project_not_found",
            TaskNotFound(_) => "task_not_found",
            MapNotFound{..} => "map_not_found",
            AssetUnavailable{..} => "asset_unavailable",
            TaskNotReady{..} => "task_not_ready",
            LimitExceeded(_) => "limit_exceeded",
            AuthFailed{..} => "auth_failed",
            UpstreamStatus{..} => "upstream_status",
            UnexpectedResponse(_) => "unexpected_response",
            DownloadFailed{..} => "download_failed",
            MappingsUnreadable{..} => "mapping_file_unreadable",
            IndexFailed(_) => "index_failed",
            IndexTimeout(_) => "index_timeout",
            ConfigError(_) | RonDeError(_) => "config_error",
            HttpError(_) => "http_error",
            IoError(_) => "io_error",
            JsonError(_) => "json_error",
        }
    }

    pub fn status_code (&self)->StatusCode {
        self.category().status_code()
    }

    /// WebODM answers unknown task ids with a 404, which we report as our own not-found
    pub fn or_task_not_found (self, task_id: &str)->Self {
        match self {
            OdinWebOdmError::UpstreamStatus{ status: 404, .. } => OdinWebOdmError::TaskNotFound(task_id.to_string()),
            other => other
        }
    }

    /// additional diagnostic fields that are merged into the JSON error response
    fn context (&self)->Map<String,Value> {
        use OdinWebOdmError::*;
        let mut ctx = Map::new();
        match self {
            MissingParams{missing,received} => {
                ctx.insert( "missing".into(), json!(missing));
                ctx.insert( "received".into(), Value::Object( received.clone()));
            }
            ProjectNotFound{name,available} => {
                ctx.insert( "looking_for".into(), json!(name));
                ctx.insert( "available_projects".into(), json!(available));
            }
            MapNotFound{name,available} => {
                ctx.insert( "requested".into(), json!(name));
                ctx.insert( "available_maps".into(), json!(available));
            }
            AssetUnavailable{available,..} => {
                ctx.insert( "available_assets".into(), json!(available));
            }
            TaskNotFound(task_id) => {
                ctx.insert( "task_id".into(), json!(task_id));
            }
            TaskNotReady{status} => {
                ctx.insert( "current_status".into(), json!( status.map(|s| s.code())));
                ctx.insert( "status_codes".into(), json!( TaskStatus::code_table()));
            }
            AuthFailed{status: Some(status),..} => {
                ctx.insert( "upstream_status".into(), json!(status));
            }
            UpstreamStatus{status,body,..} => {
                ctx.insert( "upstream_status".into(), json!(status));
                ctx.insert( "upstream_body".into(), body.clone());
            }
            _ => {}
        }
        ctx
    }
}

impl IntoResponse for OdinWebOdmError {
    fn into_response (self)->Response {
        let category = self.category();
        let status = category.status_code();

        if status.is_server_error() { error!("request failed: {self}") } else { warn!("request rejected: {self}") }

        let mut body = Map::new();
        body.insert( "error".into(), json!( self.to_string()));
        body.insert( "category".into(), json!( category.as_str()));
        body.insert( "code".into(), json!( self.code()));
        body.extend( self.context());

        (status, Json( Value::Object(body))).into_response()
    }
}

pub fn missing_param (name: impl ToString)->OdinWebOdmError {
    OdinWebOdmError::MissingParam(name.to_string())
}

pub fn invalid_param (msg: impl ToString)->OdinWebOdmError {
    OdinWebOdmError::InvalidParam(msg.to_string())
}

pub fn index_failed (msg: impl ToString)->OdinWebOdmError {
    OdinWebOdmError::IndexFailed(msg.to_string())
}

pub fn limit_exceeded (msg: impl ToString)->OdinWebOdmError {
    OdinWebOdmError::LimitExceeded(msg.to_string())
}

pub fn config_error (msg: impl ToString)->OdinWebOdmError {
    OdinWebOdmError::ConfigError(msg.to_string())
}
