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
//! the bridge HTTP API. All routes are mounted under `/api`:
//!
//!     POST /push-images                 multipart images + project_name (+ options)
//!     GET  /get-projects
//!     GET  /get-tasks?project_id=<id>   (or /get-tasks/<id>)
//!     GET  /get-task-status/<task_id>   (or ?task_id=<id>)
//!     GET  /task-progress?task_id=<id>&project_id=<id>
//!     POST /create-project              {name}
//!     POST /delete-project              {project_id}
//!     POST /rename-project              {project_id, new_name}
//!     POST /commit-task-to-map          {task_id, project_id, map_name, require_shapefile?}
//!
//! JSON request bodies are parsed by the handlers themselves so that malformed input gets the same
//! error responses as everything else.

use std::sync::Arc;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::commit::{commit_task_to_map, CommitRequest, CommitResult};
use crate::config::BridgeConfig;
use crate::errors::{invalid_param, missing_param, Result};
use crate::gdal::{GdalTindex, SpatialIndexer};
use crate::progress::TaskProgressReport;
use crate::submit::{submit_images, SubmissionResult};
use crate::uploads::receive_upload;
use crate::webodm::{check_id, deserialize_opt_id, Project, Task, WebOdmApi, WebOdmClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub webodm: Arc<dyn WebOdmApi>,
    pub indexer: Arc<dyn SpatialIndexer>,
}

impl AppState {
    pub fn new (config: BridgeConfig, webodm: Arc<dyn WebOdmApi>, indexer: Arc<dyn SpatialIndexer>)->Self {
        AppState { config: Arc::new(config), webodm, indexer }
    }

    /// state with the real WebODM client and `gdaltindex` runner
    pub fn from_config (config: BridgeConfig)->Result<Self> {
        let webodm = Arc::new( WebOdmClient::new( &config.webodm)?);
        let indexer = Arc::new( GdalTindex::from_config( &config.gdal)?);
        Ok( AppState::new( config, webodm, indexer))
    }
}

pub fn build_router (state: AppState)->Router {
    let api = Router::new()
        // upload limits are enforced while receiving the multipart body
        .route( "/push-images", post(push_images).layer( DefaultBodyLimit::disable()))
        .route( "/get-projects", get(get_projects))
        .route( "/get-tasks", get(get_tasks_query))
        .route( "/get-tasks/{project_id}", get(get_tasks_path))
        .route( "/get-task-status", get(get_task_status_query))
        .route( "/get-task-status/{task_id}", get(get_task_status_path))
        .route( "/task-progress", get(task_progress))
        .route( "/create-project", post(create_project))
        .route( "/delete-project", post(delete_project))
        .route( "/rename-project", post(rename_project))
        .route( "/commit-task-to-map", post(commit_to_map));

    Router::new()
        .nest( "/api", api)
        .layer( TraceLayer::new_for_http())
        .with_state( state)
}

/* #region request types ************************************************************************/

#[derive(Deserialize,Debug,Default)]
#[serde(default)]
struct IdQuery {
    #[serde(deserialize_with="deserialize_opt_id")]
    task_id: Option<String>,
    #[serde(deserialize_with="deserialize_opt_id")]
    project_id: Option<String>,
}

#[derive(Deserialize,Debug,Default)]
#[serde(default)]
struct CreateProjectRequest {
    name: Option<String>,
}

#[derive(Deserialize,Debug,Default)]
#[serde(default)]
struct DeleteProjectRequest {
    #[serde(deserialize_with="deserialize_opt_id")]
    project_id: Option<String>,
}

#[derive(Deserialize,Debug,Default)]
#[serde(default)]
struct RenameProjectRequest {
    #[serde(deserialize_with="deserialize_opt_id")]
    project_id: Option<String>,
    new_name: Option<String>,
}

/// an empty body is treated like `{}`, which lets the handler report missing parameters
fn parse_body<T> (body: &Bytes)->Result<T> where T: DeserializeOwned + Default {
    if body.iter().all( |b| b.is_ascii_whitespace()) {
        Ok( T::default())
    } else {
        serde_json::from_slice( body).map_err( |e| invalid_param( format!("malformed JSON body: {e}")))
    }
}

fn required<'a> (name: &str, value: &'a Option<String>)->Result<&'a str> {
    match value.as_deref().map( str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err( missing_param(name))
    }
}

fn required_id<'a> (name: &str, value: &'a Option<String>)->Result<&'a str> {
    check_id( name, required( name, value)?)
}

/* #endregion request types */

/* #region handlers *****************************************************************************/

async fn push_images (State(state): State<AppState>, multipart: std::result::Result<Multipart,MultipartRejection>)->Result<Json<SubmissionResult>> {
    let multipart = multipart.map_err( |e| invalid_param( format!("multipart/form-data body required: {e}")))?;

    // if this fails all files received so far are removed when the partial form is dropped
    let form = receive_upload( multipart, &state.config.uploads).await?;
    let result = submit_images( state.webodm.as_ref(), &state.config, &form).await;
    form.images.cleanup();

    Ok( Json( result?))
}

async fn get_projects (State(state): State<AppState>)->Result<Json<Vec<Project>>> {
    let token = state.webodm.get_token().await?;
    let projects = state.webodm.list_projects( &token).await?;
    debug!("found {} projects", projects.len());
    Ok( Json(projects))
}

async fn get_tasks_query (State(state): State<AppState>, Query(q): Query<IdQuery>)->Result<Json<Vec<Task>>> {
    let project_id = required_id( "project_id", &q.project_id)?;
    list_tasks( &state, project_id).await
}

async fn get_tasks_path (State(state): State<AppState>, Path(project_id): Path<String>)->Result<Json<Vec<Task>>> {
    list_tasks( &state, check_id( "project_id", &project_id)?).await
}

async fn list_tasks (state: &AppState, project_id: &str)->Result<Json<Vec<Task>>> {
    let token = state.webodm.get_token().await?;
    let tasks = state.webodm.list_tasks( &token, project_id).await?;
    Ok( Json(tasks))
}

async fn get_task_status_query (State(state): State<AppState>, Query(q): Query<IdQuery>)->Result<Json<Value>> {
    let task_id = required_id( "task_id", &q.task_id)?;
    task_status( &state, task_id).await
}

async fn get_task_status_path (State(state): State<AppState>, Path(task_id): Path<String>)->Result<Json<Value>> {
    task_status( &state, check_id( "task_id", &task_id)?).await
}

async fn task_status (state: &AppState, task_id: &str)->Result<Json<Value>> {
    let token = state.webodm.get_token().await?;
    let task = state.webodm.get_task( &token, task_id).await.map_err( |e| e.or_task_not_found( task_id))?;
    Ok( Json( json!({ "status": task.status, "task": task })))
}

async fn task_progress (State(state): State<AppState>, Query(q): Query<IdQuery>)->Result<Json<TaskProgressReport>> {
    let task_id = required_id( "task_id", &q.task_id)?;
    let project_id = required_id( "project_id", &q.project_id)?;

    let token = state.webodm.get_token().await?;
    let task = state.webodm.get_project_task( &token, project_id, task_id).await
        .map_err( |e| e.or_task_not_found( task_id))?;

    Ok( Json( TaskProgressReport::new( project_id, task)))
}

async fn create_project (State(state): State<AppState>, body: Bytes)->Result<Json<Project>> {
    let req: CreateProjectRequest = parse_body( &body)?;
    let name = required( "name", &req.name)?;

    let token = state.webodm.get_token().await?;
    let project = state.webodm.create_project( &token, name).await?;
    Ok( Json(project))
}

async fn delete_project (State(state): State<AppState>, body: Bytes)->Result<Json<Value>> {
    let req: DeleteProjectRequest = parse_body( &body)?;
    let project_id = required_id( "project_id", &req.project_id)?;

    let token = state.webodm.get_token().await?;
    state.webodm.delete_project( &token, project_id).await?;
    info!("deleted project {project_id}");

    Ok( Json( json!({
        "message": format!("Project {project_id} deleted successfully"),
        "project_id": project_id
    })))
}

async fn rename_project (State(state): State<AppState>, body: Bytes)->Result<Json<Project>> {
    let req: RenameProjectRequest = parse_body( &body)?;
    let project_id = required_id( "project_id", &req.project_id)?;
    let new_name = required( "new_name", &req.new_name)?;

    let token = state.webodm.get_token().await?;
    let project = state.webodm.rename_project( &token, project_id, new_name).await?;
    info!("renamed project {project_id} to {new_name}");
    Ok( Json(project))
}

async fn commit_to_map (State(state): State<AppState>, body: Bytes)->Result<Json<CommitResult>> {
    let req: CommitRequest = parse_body( &body)?;
    let result = commit_task_to_map( state.webodm.as_ref(), state.indexer.as_ref(), &state.config, req).await?;
    Ok( Json(result))
}

/* #endregion handlers */
