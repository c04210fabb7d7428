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
#![allow(dead_code)]

use std::{path::{Path, PathBuf}, sync::{Arc, Mutex}};
use anyhow::Result as TestResult;
use async_trait::async_trait;
use axum::{body::Body, http::{Request, StatusCode}, Router};
use serde_json::{json, Value};
use tower::ServiceExt;

use odin_webodm::{
    errors::{index_failed, OdinWebOdmError, Result},
    gdal::{shapefile_companions, IndexOutcome, IndexRequest, SpatialIndexer},
    webodm::TaskSubmission,
    AppState, BridgeConfig, Project, Task, WebOdmApi,
};

/* #region recording WebODM double **************************************************************/

pub struct MockWebOdm {
    pub calls: Mutex<Vec<String>>,
    pub submitted_images: Mutex<Vec<String>>,
    pub submitted_options: Mutex<Vec<Value>>,
    pub projects: Vec<Project>,
    /// `None` answers task requests with an upstream 404
    pub task: Option<Task>,
    /// `None` makes downloads fail after writing a partial file
    pub asset_data: Option<Vec<u8>>,
    /// makes `create_task` fail after it has seen the uploaded files
    pub fail_create_task: bool,
}

impl MockWebOdm {
    pub fn new ()->Self {
        MockWebOdm {
            calls: Mutex::new( Vec::new()),
            submitted_images: Mutex::new( Vec::new()),
            submitted_options: Mutex::new( Vec::new()),
            projects: projects(),
            task: None,
            asset_data: Some( b"II*\0fake-geotiff-data".to_vec()),
            fail_create_task: false,
        }
    }

    pub fn with_task (mut self, task: Task)->Self { self.task = Some(task); self }
    pub fn without_asset_data (mut self)->Self { self.asset_data = None; self }
    pub fn with_failing_create_task (mut self)->Self { self.fail_create_task = true; self }

    pub fn calls (&self)->Vec<String> {
        self.calls.lock().map( |c| c.clone()).unwrap_or_default()
    }

    fn record (&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() { calls.push( call.to_string()) }
    }

    fn task_or_404 (&self, task_id: &str)->Result<Task> {
        match &self.task {
            Some(task) if task.id == task_id => Ok( task.clone()),
            _ => Err( OdinWebOdmError::UpstreamStatus {
                url: format!("http://webodm/api/tasks/{task_id}/"),
                status: 404,
                body: json!({ "detail": "Not found." })
            })
        }
    }
}

pub fn projects ()->Vec<Project> {
    serde_json::from_value( json!([
        { "id": 3, "name": "Ridge Survey" },
        { "id": 7, "name": "Orchard North" }
    ])).unwrap()
}

pub fn task (id: &str, status: i64, assets: &[&str])->Task {
    serde_json::from_value( json!({
        "id": id,
        "status": status,
        "upload_progress": 1.0,
        "resize_progress": 1.0,
        "running_progress": if status == 40 { 1.0 } else { 0.4 },
        "available_assets": assets,
        "images_count": 2,
        "name": "Upload_2imgs_0.00MB_2026-10-17T08-15-00"
    })).unwrap()
}

#[async_trait]
impl WebOdmApi for MockWebOdm {
    async fn get_token (&self)->Result<String> {
        self.record("get_token");
        Ok("tok-123".to_string())
    }

    async fn list_projects (&self, _token: &str)->Result<Vec<Project>> {
        self.record("list_projects");
        Ok( self.projects.clone())
    }

    async fn create_project (&self, _token: &str, name: &str)->Result<Project> {
        self.record("create_project");
        Ok( serde_json::from_value( json!({ "id": 11, "name": name }))?)
    }

    async fn rename_project (&self, _token: &str, project_id: &str, new_name: &str)->Result<Project> {
        self.record("rename_project");
        Ok( serde_json::from_value( json!({ "id": project_id.parse::<u64>().unwrap_or(0), "name": new_name }))?)
    }

    async fn delete_project (&self, _token: &str, _project_id: &str)->Result<()> {
        self.record("delete_project");
        Ok(())
    }

    async fn list_tasks (&self, _token: &str, _project_id: &str)->Result<Vec<Task>> {
        self.record("list_tasks");
        Ok( self.task.iter().cloned().collect())
    }

    async fn get_task (&self, _token: &str, task_id: &str)->Result<Task> {
        self.record("get_task");
        self.task_or_404( task_id)
    }

    async fn get_project_task (&self, _token: &str, _project_id: &str, task_id: &str)->Result<Task> {
        self.record("get_project_task");
        self.task_or_404( task_id)
    }

    async fn create_task (&self, _token: &str, project_id: u64, submission: &TaskSubmission<'_>)->Result<Task> {
        self.record("create_task");
        for img in submission.images {
            // the files have to exist while the task is created
            assert!( img.path().is_file());
            if let Ok(mut names) = self.submitted_images.lock() { names.push( img.file_name.clone()) }
        }
        if let Ok(mut opts) = self.submitted_options.lock() { opts.push( serde_json::to_value( &submission.options)?) }

        if self.fail_create_task {
            return Err( OdinWebOdmError::UpstreamStatus {
                url: format!("http://webodm/api/projects/{project_id}/tasks/"),
                status: 500,
                body: json!({ "detail": "Could not create task" })
            })
        }

        Ok( serde_json::from_value( json!({
            "id": "9f8e7d6c-0000-4000-8000-000000000001",
            "project": project_id,
            "status": 10,
            "name": submission.name,
            "images_count": submission.images.len()
        }))?)
    }

    async fn download_asset (&self, _token: &str, _project_id: &str, _task_id: &str, _asset: &str, path: &Path)->Result<u64> {
        self.record("download_asset");
        match &self.asset_data {
            Some(data) => {
                std::fs::write( path, data)?;
                Ok( data.len() as u64)
            }
            None => {
                std::fs::write( path, b"partial")?;
                Err( OdinWebOdmError::DownloadFailed { url: "http://webodm/download".into(), details: "connection reset".into() })
            }
        }
    }
}

/* #endregion recording WebODM double */

/// creates the shapefile set itself unless it is told to fail
pub struct MockIndexer {
    pub requests: Mutex<Vec<IndexRequest>>,
    pub fail: bool,
}

impl MockIndexer {
    pub fn new (fail: bool)->Self { MockIndexer { requests: Mutex::new( Vec::new()), fail } }

    pub fn outputs (&self)->Vec<PathBuf> {
        self.requests.lock().map( |r| r.iter().map( |req| req.output.clone()).collect()).unwrap_or_default()
    }
}

#[async_trait]
impl SpatialIndexer for MockIndexer {
    async fn create_index (&self, request: &IndexRequest)->Result<IndexOutcome> {
        if let Ok(mut reqs) = self.requests.lock() { reqs.push( request.clone()) }
        if self.fail {
            return Err( index_failed( "gdaltindex exited with exit status: 1"))
        }
        for ext in ["shp", "shx", "dbf"] {
            std::fs::write( request.output.with_extension(ext), b"x")?;
        }
        Ok( IndexOutcome {
            shapefile: request.output.clone(),
            companions: shapefile_companions( &request.output),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// config with mappings and uploads inside `dir`, mapping "survey" to `<dir>/maps/survey`
pub fn test_config (dir: &Path)->TestResult<BridgeConfig> {
    let mappings_path = dir.join("map_mappings.json");
    let mappings = json!({ "survey": dir.join("maps/survey"), "basemap": dir.join("maps/basemap") });
    std::fs::write( &mappings_path, serde_json::to_vec_pretty( &mappings)?)?;

    let mut config = BridgeConfig::default();
    config.mappings_path = mappings_path.to_string_lossy().into_owned();
    config.uploads.dir = dir.join("uploads").to_string_lossy().into_owned();
    Ok(config)
}

pub fn test_router (config: BridgeConfig, webodm: Arc<MockWebOdm>, indexer: Arc<MockIndexer>)->Router {
    odin_webodm::build_router( AppState::new( config, webodm, indexer))
}

pub async fn send (router: &Router, req: Request<Body>)->TestResult<(StatusCode,Value)> {
    let response = router.clone().oneshot( req).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes( response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice( &bytes)? };
    Ok( (status, body))
}

pub fn post_json (uri: &str, body: Value)->TestResult<Request<Body>> {
    Ok( Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body( Body::from( body.to_string()))?)
}

pub fn get (uri: &str)->TestResult<Request<Body>> {
    Ok( Request::builder().method("GET").uri(uri).body( Body::empty())?)
}

pub const BOUNDARY: &str = "----odin-webodm-test-boundary";

pub enum Part<'a> {
    File { field: &'a str, file_name: &'a str, content_type: &'a str, data: &'a [u8] },
    Text { field: &'a str, value: &'a str },
}

pub fn multipart_request (uri: &str, parts: &[Part<'_>])->TestResult<Request<Body>> {
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        body.extend_from_slice( format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File { field, file_name, content_type, data } => {
                body.extend_from_slice( format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n").as_bytes());
                body.extend_from_slice( format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                body.extend_from_slice( data);
            }
            Part::Text { field, value } => {
                body.extend_from_slice( format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n").as_bytes());
                body.extend_from_slice( value.as_bytes());
            }
        }
        body.extend_from_slice( b"\r\n");
    }
    body.extend_from_slice( format!("--{BOUNDARY}--\r\n").as_bytes());

    Ok( Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body( Body::from(body))?)
}

/// number of entries left in the upload dir (0 if it does not exist)
pub fn upload_dir_entries (config: &BridgeConfig)->usize {
    std::fs::read_dir( config.upload_dir()).map( |rd| rd.count()).unwrap_or(0)
}
