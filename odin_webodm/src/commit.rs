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
//! publishing the orthophoto of a completed WebODM task into a map serving directory.
//!
//! This runs strictly in order: validate input, resolve the map name, check the task, download the
//! orthophoto, then build the spatial index. Nothing remote happens before the map name is resolved
//! and nothing is downloaded for tasks that are not completed. There is no rollback - if indexing
//! fails the downloaded orthophoto stays where it is, and so does a previously published index.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::errors::{OdinWebOdmError, Result};
use crate::gdal::{shapefile_companions, IndexRequest, IndexSource, SpatialIndexer, SHAPEFILE_COMPANION_EXTS};
use crate::mappings::load_mappings;
use crate::webodm::{check_id, deserialize_opt_id, WebOdmApi};

pub const ORTHOPHOTO_ASSET: &str = "orthophoto.tif";

#[derive(Debug,Clone,Default,Deserialize)]
#[serde(default)]
pub struct CommitRequest {
    #[serde(deserialize_with="deserialize_opt_id")]
    pub task_id: Option<String>,

    #[serde(deserialize_with="deserialize_opt_id")]
    pub project_id: Option<String>,

    pub map_name: Option<String>,

    /// if false a failed index generation is only reported as a warning (default is true)
    pub require_shapefile: Option<bool>,
}

#[derive(Debug,Clone,Serialize)]
pub struct DownloadedAssets {
    pub orthophoto_tif: PathBuf,
    #[serde(skip_serializing_if="Option::is_none")]
    pub shapefile: Option<PathBuf>,
    pub shapefile_companions: Vec<PathBuf>,
}

#[derive(Debug,Clone,Serialize)]
pub struct CommitResult {
    pub message: String,
    pub task_id: String,
    pub project_id: String,
    pub map_name: String,
    pub destination_directory: PathBuf,
    pub downloaded_assets: DownloadedAssets,
    pub available_assets: Vec<String>,
    pub warnings: Vec<String>,
    pub shapefile_created: bool,
}

pub fn orthophoto_file_name (task_id: &str)->String { format!("task_{task_id}_orthophoto.tif") }
pub fn index_file_name (task_id: &str)->String { format!("task_{task_id}_index.shp") }
fn pending_index_file_name (task_id: &str)->String { format!("task_{task_id}_index.tmp.shp") }

struct ValidCommit {
    task_id: String,
    project_id: String,
    map_name: String,
    require_shapefile: bool,
}

fn validate (req: CommitRequest)->Result<ValidCommit> {
    let map_name = req.map_name.map( |s| s.trim().to_string()).filter( |s| !s.is_empty());

    let mut missing: Vec<String> = Vec::new();
    let mut received = Map::new();
    for (key, value) in [("task_id", &req.task_id), ("project_id", &req.project_id), ("map_name", &map_name)] {
        match value {
            Some(v) => { received.insert( key.to_string(), json!(v)); }
            None => missing.push( key.to_string()),
        }
    }

    match (req.task_id, req.project_id, map_name) {
        (Some(task_id), Some(project_id), Some(map_name)) => {
            check_id( "task_id", &task_id)?;
            check_id( "project_id", &project_id)?;
            Ok( ValidCommit { task_id, project_id, map_name, require_shapefile: req.require_shapefile.unwrap_or(true) })
        }
        _ => Err( OdinWebOdmError::MissingParams { missing, received })
    }
}

pub async fn commit_task_to_map (webodm: &dyn WebOdmApi, indexer: &dyn SpatialIndexer, config: &BridgeConfig, req: CommitRequest)->Result<CommitResult> {
    let ValidCommit { task_id, project_id, map_name, require_shapefile } = validate( req)?;

    // mappings are re-read for each commit so that edits are picked up without a restart
    let mappings = load_mappings( config.mappings_path()).await?;
    let dest_dir = mappings.resolve( &map_name)?.to_path_buf();
    info!("committing task {task_id} of project {project_id} to map {map_name} ({dest_dir:?})");

    let token = webodm.get_token().await?;
    let task = webodm.get_project_task( &token, &project_id, &task_id).await
        .map_err( |e| e.or_task_not_found( &task_id))?;

    if !task.is_completed() {
        return Err( OdinWebOdmError::TaskNotReady { status: task.status })
    }
    if !task.has_asset( ORTHOPHOTO_ASSET) {
        return Err( OdinWebOdmError::AssetUnavailable { asset: ORTHOPHOTO_ASSET.to_string(), available: task.available_assets.clone() })
    }

    if !dest_dir.is_dir() {
        tokio::fs::create_dir_all( &dest_dir).await?;
    }

    let ortho_path = dest_dir.join( orthophoto_file_name( &task_id));
    if let Err(e) = webodm.download_asset( &token, &project_id, &task_id, ORTHOPHOTO_ASSET, &ortho_path).await {
        remove_partial_file( &ortho_path).await;
        return Err(e)
    }

    // gdaltindex appends to existing indices and might fail halfway, hence we build a fresh index
    // under a pending name and only replace the published one once that succeeded
    let index_path = dest_dir.join( index_file_name( &task_id));
    let pending_path = dest_dir.join( pending_index_file_name( &task_id));
    remove_index_files( &pending_path).await;

    let index_request = IndexRequest {
        source: IndexSource::File( ortho_path.clone()),
        output: pending_path.clone(),
        timeout: config.gdal.timeout(),
    };
    let indexed = match indexer.create_index( &index_request).await {
        Ok(_) => publish_index( &pending_path, &index_path).await,
        Err(e) => Err(e)
    };

    let mut warnings: Vec<String> = Vec::new();
    let (shapefile, shapefile_companions) = match indexed {
        Ok(()) => (Some( index_path.clone()), shapefile_companions( &index_path)),
        Err(e) => {
            remove_index_files( &pending_path).await;
            if require_shapefile { return Err(e) }
            warn!("continuing without new spatial index for task {task_id}: {e}");
            warnings.push( format!("Shapefile creation failed: {e}"));
            (None, Vec::new())
        }
    };
    let shapefile_created = shapefile.is_some();

    let message = if shapefile_created {
        format!("Task {task_id} committed to map {map_name}")
    } else {
        format!("Task {task_id} orthophoto committed to map {map_name} without spatial index")
    };
    info!("{message}");

    Ok( CommitResult {
        message,
        task_id,
        project_id,
        map_name,
        destination_directory: dest_dir,
        downloaded_assets: DownloadedAssets { orthophoto_tif: ortho_path, shapefile, shapefile_companions },
        available_assets: task.available_assets,
        warnings,
        shapefile_created,
    })
}

fn index_file_set (shapefile: &Path)->impl Iterator<Item=PathBuf> + '_ {
    SHAPEFILE_COMPANION_EXTS.into_iter().chain( std::iter::once("shp")).map( move |ext| shapefile.with_extension( ext))
}

/// move the pending shapefile set over the published one. Published files the new set does not
/// have are removed, the `.shp` goes last
async fn publish_index (pending: &Path, published: &Path)->Result<()> {
    for (from, to) in index_file_set( pending).zip( index_file_set( published)) {
        if tokio::fs::metadata( &from).await.is_ok() {
            tokio::fs::rename( &from, &to).await?;
            debug!("published index file {to:?}");
        } else {
            match tokio::fs::remove_file( &to).await {
                Ok(()) => debug!("removed stale index file {to:?}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into())
            }
        }
    }
    Ok(())
}

async fn remove_index_files (shapefile: &Path) {
    for path in index_file_set( shapefile) {
        match tokio::fs::remove_file( &path).await {
            Ok(()) => debug!("removed index file {path:?}"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove index file {path:?}: {e}")
        }
    }
}

async fn remove_partial_file (path: &Path) {
    match tokio::fs::remove_file( path).await {
        Ok(()) => info!("removed partial download {path:?}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove partial download {path:?}: {e}")
    }
}

