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
//! WebODM data model and REST client.
//!
//! All endpoints are addressed relative to the configured server root as `/api/...`, requests
//! are authenticated with `Authorization: JWT <token>`. Tokens are not cached - each incoming
//! request that needs one obtains a fresh token from `/api/token-auth/`.

use std::{collections::BTreeMap, fmt, path::Path, time::Duration};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, multipart::{Form, Part}, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::WebOdmConfig;
use crate::errors::{OdinWebOdmError, Result};
use crate::uploads::UploadedImage;

/* #region data model ***************************************************************************/

/// WebODM task status codes
#[derive(Debug,Clone,Copy,PartialEq,Eq,Serialize,Deserialize)]
#[serde(from="i64", into="i64")]
pub enum TaskStatus {
    Queued,
    Running,
    Failed,
    Completed,
    Canceled,
    Other(i64),
}

impl TaskStatus {
    pub fn code (&self)->i64 {
        match *self {
            TaskStatus::Queued => 10,
            TaskStatus::Running => 20,
            TaskStatus::Failed => 30,
            TaskStatus::Completed => 40,
            TaskStatus::Canceled => 50,
            TaskStatus::Other(code) => code,
        }
    }

    pub fn label (&self)->&'static str {
        match *self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Other(_) => "UNKNOWN",
        }
    }

    /// the known codes, as reported to clients that try to commit unfinished tasks
    pub fn code_table ()->BTreeMap<String,&'static str> {
        [TaskStatus::Queued, TaskStatus::Running, TaskStatus::Failed, TaskStatus::Completed, TaskStatus::Canceled]
            .iter().map( |s| (s.code().to_string(), s.label())).collect()
    }
}

impl From<i64> for TaskStatus {
    fn from (code: i64)->Self {
        match code {
            10 => TaskStatus::Queued,
            20 => TaskStatus::Running,
            30 => TaskStatus::Failed,
            40 => TaskStatus::Completed,
            50 => TaskStatus::Canceled,
            other => TaskStatus::Other(other)
        }
    }
}

impl From<TaskStatus> for i64 {
    fn from (status: TaskStatus)->i64 { status.code() }
}

impl fmt::Display for TaskStatus {
    fn fmt (&self, f: &mut fmt::Formatter<'_>)->fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// a WebODM project. Fields we don't use are kept in `extra` so that we can pass them on unchanged
#[derive(Debug,Clone,Serialize,Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String,Value>,
}

#[derive(Debug,Clone,Serialize,Deserialize)]
pub struct Task {
    #[serde(deserialize_with="deserialize_id")]
    pub id: String,

    #[serde(default)]
    pub status: Option<TaskStatus>,

    #[serde(default)]
    pub upload_progress: Option<f64>,
    #[serde(default)]
    pub resize_progress: Option<f64>,
    #[serde(default)]
    pub running_progress: Option<f64>,

    #[serde(default, deserialize_with="deserialize_null_as_default")]
    pub available_assets: Vec<String>,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub processing_time: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub images_count: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String,Value>,
}

impl Task {
    pub fn is_completed (&self)->bool {
        self.status == Some(TaskStatus::Completed)
    }

    pub fn has_asset (&self, asset: &str)->bool {
        self.available_assets.iter().any( |a| a == asset)
    }
}

/// a single WebODM processing option such as `{"name": "resize-to", "value": 1024}`
#[derive(Debug,Clone,PartialEq,Serialize,Deserialize)]
pub struct TaskOption {
    pub name: String,
    pub value: Value,
}

impl TaskOption {
    pub fn new (name: impl ToString, value: Value)->Self {
        TaskOption { name: name.to_string(), value }
    }
}

/// defaults that are not overridden by name, followed by all user options (in their given order)
pub fn merge_task_options (defaults: &[TaskOption], user_options: &[TaskOption])->Vec<TaskOption> {
    let mut merged: Vec<TaskOption> = defaults.iter()
        .filter( |d| !user_options.iter().any( |u| u.name == d.name))
        .cloned()
        .collect();
    merged.extend_from_slice( user_options);
    merged
}

/// parse the client supplied `options` form field. Anything that is not a JSON array of
/// `{name,value}` objects is ignored (with a warning) so that the defaults are used
pub fn parse_task_options (raw: &str)->Option<Vec<TaskOption>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Array(_)) => {
            match serde_json::from_value::<Vec<TaskOption>>(v) {
                Ok(options) => Some(options),
                Err(e) => { warn!("ignoring malformed task options: {e}"); None }
            }
        }
        Ok(_) => { warn!("ignoring task options that are not a JSON array"); None }
        Err(e) => { warn!("failed to parse task options, using defaults: {e}"); None }
    }
}

/// WebODM list endpoints return either a bare array or a paginated `{"results": [...]}` envelope.
/// Anything else is an error, we never turn an unknown shape into an empty list
pub fn normalize_list<T> (body: Value, what: &str)->Result<Vec<T>> where T: DeserializeOwned {
    let items = match body {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("results") {
            Some(results @ Value::Array(_)) => results,
            _ => return Err( OdinWebOdmError::UnexpectedResponse( format!("{what} response has no results array")))
        }
        other => return Err( OdinWebOdmError::UnexpectedResponse( format!("unexpected {what} response structure: {other}")))
    };
    Ok( serde_json::from_value(items)? )
}

/// exact, case sensitive name match. If names are not unique the first project wins
pub fn resolve_project_by_name<'a> (name: &str, projects: &'a [Project])->Result<&'a Project> {
    projects.iter().find( |p| p.name == name).ok_or_else( || OdinWebOdmError::ProjectNotFound {
        name: name.to_string(),
        available: projects.iter().map( |p| p.name.clone()).collect()
    })
}

/// ids come as JSON strings or numbers (projects have numeric ids, tasks have uuids)
pub fn deserialize_id<'de,D> (deserializer: D)->std::result::Result<String,D::Error> where D: Deserializer<'de> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err( serde::de::Error::custom( format!("invalid id: {other}")))
    }
}

/// optional variant of [`deserialize_id`] that also maps `null` and blank strings to `None`
pub fn deserialize_opt_id<'de,D> (deserializer: D)->std::result::Result<Option<String>,D::Error> where D: Deserializer<'de> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok( if s.trim().is_empty() { None } else { Some(s) }),
        Value::Number(n) => Ok( Some(n.to_string())),
        other => Err( serde::de::Error::custom( format!("invalid id: {other}")))
    }
}

/// ids are used as URL path segments and in file names, hence we only accept `[A-Za-z0-9_-]`
pub fn check_id<'a> (what: &str, id: &'a str)->Result<&'a str> {
    if !id.is_empty() && id.chars().all( |c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(id)
    } else {
        Err( OdinWebOdmError::InvalidParam( format!("{what} is not a valid id: {id:?}")))
    }
}

fn deserialize_null_as_default<'de,D,T> (deserializer: D)->std::result::Result<T,D::Error>
    where D: Deserializer<'de>, T: Default + Deserialize<'de>
{
    Ok( Option::<T>::deserialize(deserializer)?.unwrap_or_default() )
}

/// what we need to create a new task
pub struct TaskSubmission<'a> {
    pub name: String,
    pub options: Vec<TaskOption>,
    pub images: &'a [UploadedImage],
}

/* #endregion data model */

/// the WebODM operations used by the bridge. This is the seam that lets handlers run against
/// a test double instead of a real server
#[async_trait]
pub trait WebOdmApi: Send + Sync {
    async fn get_token (&self)->Result<String>;

    async fn list_projects (&self, token: &str)->Result<Vec<Project>>;
    async fn create_project (&self, token: &str, name: &str)->Result<Project>;
    async fn rename_project (&self, token: &str, project_id: &str, new_name: &str)->Result<Project>;
    async fn delete_project (&self, token: &str, project_id: &str)->Result<()>;

    async fn list_tasks (&self, token: &str, project_id: &str)->Result<Vec<Task>>;
    async fn get_task (&self, token: &str, task_id: &str)->Result<Task>;
    async fn get_project_task (&self, token: &str, project_id: &str, task_id: &str)->Result<Task>;
    async fn create_task (&self, token: &str, project_id: u64, submission: &TaskSubmission<'_>)->Result<Task>;

    /// stream a task asset into `path`, returning the number of bytes written
    async fn download_asset (&self, token: &str, project_id: &str, task_id: &str, asset: &str, path: &Path)->Result<u64>;
}

pub struct WebOdmClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

impl WebOdmClient {
    pub fn new (config: &WebOdmConfig)->Result<Self> {
        let client = Client::builder().build()?;
        Ok( WebOdmClient {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn api_url (&self, rel_path: &str)->String {
        format!("{}/api/{}", self.base_url, rel_path)
    }

    fn authorized (&self, req: RequestBuilder, token: &str)->RequestBuilder {
        req.header( AUTHORIZATION, format!("JWT {token}"))
    }

    /// send a JSON request and turn non-2xx responses into `UpstreamStatus` errors
    async fn send (&self, req: RequestBuilder, url: &str)->Result<Response> {
        let response = req.timeout( self.request_timeout).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else {
            Err( upstream_error( url, response).await )
        }
    }

    async fn send_json<T> (&self, req: RequestBuilder, url: &str)->Result<T> where T: DeserializeOwned {
        let response = self.send( req, url).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice( &bytes).map_err( |e| OdinWebOdmError::UnexpectedResponse( format!("{url}: {e}")))
    }
}

async fn upstream_error (url: &str, response: Response)->OdinWebOdmError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<Value>( &text).unwrap_or( Value::String(text));
    OdinWebOdmError::UpstreamStatus { url: url.to_string(), status, body }
}

#[async_trait]
impl WebOdmApi for WebOdmClient {

    async fn get_token (&self)->Result<String> {
        let url = self.api_url("token-auth/");
        let req = self.client.post( &url).json( &TokenRequest{ username: &self.username, password: &self.password });

        let response = req.timeout( self.request_timeout).send().await
            .map_err( |e| OdinWebOdmError::AuthFailed { status: None, details: e.to_string() })?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err( OdinWebOdmError::AuthFailed { status: Some(status.as_u16()), details: format!("status {status}: {body}") })
        }

        let tr: TokenResponse = response.json().await
            .map_err( |e| OdinWebOdmError::AuthFailed { status: Some(status.as_u16()), details: e.to_string() })?;

        match tr.token {
            Some(token) if !token.is_empty() => {
                debug!("obtained WebODM token");
                Ok(token)
            }
            _ => Err( OdinWebOdmError::AuthFailed { status: Some(status.as_u16()), details: "no token in response".into() })
        }
    }

    async fn list_projects (&self, token: &str)->Result<Vec<Project>> {
        let url = self.api_url("projects/");
        let body: Value = self.send_json( self.authorized( self.client.get(&url), token), &url).await?;
        normalize_list( body, "projects")
    }

    async fn create_project (&self, token: &str, name: &str)->Result<Project> {
        let url = self.api_url("projects/");
        let req = self.authorized( self.client.post(&url), token).json( &serde_json::json!({ "name": name }));
        let project: Project = self.send_json( req, &url).await?;
        info!("created project {} ({})", project.name, project.id);
        Ok(project)
    }

    async fn rename_project (&self, token: &str, project_id: &str, new_name: &str)->Result<Project> {
        let url = self.api_url( &format!("projects/{project_id}/"));
        let req = self.authorized( self.client.patch(&url), token).json( &serde_json::json!({ "name": new_name }));
        self.send_json( req, &url).await
    }

    async fn delete_project (&self, token: &str, project_id: &str)->Result<()> {
        let url = self.api_url( &format!("projects/{project_id}/"));
        self.send( self.authorized( self.client.delete(&url), token), &url).await?;
        Ok(())
    }

    async fn list_tasks (&self, token: &str, project_id: &str)->Result<Vec<Task>> {
        let url = self.api_url( &format!("projects/{project_id}/tasks/"));
        let body: Value = self.send_json( self.authorized( self.client.get(&url), token), &url).await?;
        normalize_list( body, "tasks")
    }

    async fn get_task (&self, token: &str, task_id: &str)->Result<Task> {
        let url = self.api_url( &format!("tasks/{task_id}/"));
        self.send_json( self.authorized( self.client.get(&url), token), &url).await
    }

    async fn get_project_task (&self, token: &str, project_id: &str, task_id: &str)->Result<Task> {
        let url = self.api_url( &format!("projects/{project_id}/tasks/{task_id}/"));
        self.send_json( self.authorized( self.client.get(&url), token), &url).await
    }

    async fn create_task (&self, token: &str, project_id: u64, submission: &TaskSubmission<'_>)->Result<Task> {
        let url = self.api_url( &format!("projects/{project_id}/tasks/"));

        let mut form = Form::new();
        for img in submission.images {
            let file = tokio::fs::File::open( img.path()).await?;
            let body = reqwest::Body::wrap_stream( ReaderStream::new(file));
            let part = Part::stream_with_length( body, img.size)
                .file_name( img.file_name.clone())
                .mime_str( &img.content_type)?;
            form = form.part( "images", part);
        }
        form = form
            .text( "options", serde_json::to_string( &submission.options)?)
            .text( "name", submission.name.clone());

        info!("submitting task {} with {} images to project {}", submission.name, submission.images.len(), project_id);

        // no timeout here, large uploads can take a long time
        let response = self.authorized( self.client.post(&url), token).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err( upstream_error( &url, response).await)
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice( &bytes).map_err( |e| OdinWebOdmError::UnexpectedResponse( format!("{url}: {e}")))
    }

    async fn download_asset (&self, token: &str, project_id: &str, task_id: &str, asset: &str, path: &Path)->Result<u64> {
        let url = self.api_url( &format!("projects/{project_id}/tasks/{task_id}/download/{asset}"));
        let download_failed = |details: String| OdinWebOdmError::DownloadFailed { url: url.clone(), details };

        let mut response = self.authorized( self.client.get(&url), token).send().await
            .map_err( |e| download_failed( e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err( download_failed( format!("response status {status}")))
        }

        let mut file = tokio::fs::File::create( path).await.map_err( |e| download_failed( e.to_string()))?;
        let mut len: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err( |e| download_failed( e.to_string()))? {
            len += chunk.len() as u64;
            file.write_all( &chunk).await.map_err( |e| download_failed( e.to_string()))?;
        }
        file.flush().await.map_err( |e| download_failed( e.to_string()))?;

        info!("downloaded {len} bytes from {url} to {path:?}");
        Ok(len)
    }
}
