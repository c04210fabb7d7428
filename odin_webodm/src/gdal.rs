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
//! spatial index (shapefile) generation with the external `gdaltindex` tool.
//!
//! The environment for the child process is computed by [`GdalEnv::new`], which does not touch
//! the process environment. The runner passes all input rasters as explicit arguments, there
//! is no shell involved.

use std::{ffi::OsString, path::{Path, PathBuf}, process::Stdio, time::Duration};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::GdalConfig;
use crate::errors::{config_error, index_failed, OdinWebOdmError, Result};

pub const SHAPEFILE_COMPANION_EXTS: [&str; 3] = ["shx", "dbf", "prj"];

/// environment vars to set for GDAL child processes
#[derive(Debug,Clone,Default,PartialEq)]
pub struct GdalEnv {
    pub vars: Vec<(String,OsString)>,
}

impl GdalEnv {
    /// if the config has a `root` we prepend its `path_dirs` to `inherited_path` and add the configured
    /// vars with `{root}` substituted. Without a root the child just inherits our environment
    pub fn new (config: &GdalConfig, inherited_path: Option<OsString>)->Result<GdalEnv> {
        let Some(root) = &config.root else { return Ok( GdalEnv::default()) };
        let root_path = Path::new(root);

        let mut dirs: Vec<PathBuf> = config.path_dirs.iter().map( |d| root_path.join(d)).collect();
        if let Some(path) = &inherited_path {
            dirs.extend( std::env::split_paths( path));
        }
        let path = std::env::join_paths( dirs).map_err( |e| config_error( format!("invalid GDAL path dirs: {e}")))?;

        let mut vars = vec![ ("PATH".to_string(), path) ];
        for (k,v) in &config.env {
            vars.push( (k.clone(), OsString::from( v.replace("{root}", root))));
        }

        Ok( GdalEnv { vars })
    }

    pub fn get (&self, key: &str)->Option<&OsString> {
        self.vars.iter().find( |(k,_)| k == key).map( |(_,v)| v)
    }

    pub fn apply (&self, cmd: &mut Command) {
        for (k,v) in &self.vars {
            cmd.env( k, v);
        }
    }
}

/// what to put into a spatial index
#[derive(Debug,Clone)]
pub enum IndexSource {
    /// a single raster, this is what commits use
    File(PathBuf),
    /// all `.tif` / `.tiff` files of a directory, in name order. Commits index single files,
    /// this is for re-indexing a whole map directory in one batch
    Directory(PathBuf),
}

impl IndexSource {
    pub async fn rasters (&self)->Result<Vec<PathBuf>> {
        match self {
            IndexSource::File(path) => {
                if is_file( path).await { Ok( vec![path.clone()]) } else { Err( index_failed( format!("raster not found: {path:?}"))) }
            }
            IndexSource::Directory(dir) => {
                let cannot_read = |e: std::io::Error| index_failed( format!("cannot read {dir:?}: {e}"));
                let mut entries = tokio::fs::read_dir( dir).await.map_err( cannot_read)?;

                let mut rasters: Vec<PathBuf> = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err( cannot_read)? {
                    let path = entry.path();
                    if is_geotiff( &path) && is_file( &path).await {
                        rasters.push( path);
                    }
                }
                rasters.sort();

                if rasters.is_empty() {
                    Err( index_failed( format!("no GeoTIFF files in {dir:?}")))
                } else {
                    Ok(rasters)
                }
            }
        }
    }
}

async fn is_file (path: &Path)->bool {
    tokio::fs::metadata( path).await.map( |m| m.is_file()).unwrap_or(false)
}

fn is_geotiff (path: &Path)->bool {
    path.extension()
        .and_then( |ext| ext.to_str())
        .map( |ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

#[derive(Debug,Clone)]
pub struct IndexRequest {
    pub source: IndexSource,
    /// the `.shp` file to create
    pub output: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug,Clone)]
pub struct IndexOutcome {
    pub shapefile: PathBuf,
    /// the `.shx`/`.dbf`/`.prj` files that exist next to the shapefile
    pub companions: Vec<PathBuf>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait SpatialIndexer: Send + Sync {
    async fn create_index (&self, request: &IndexRequest)->Result<IndexOutcome>;
}

/// runs `<tindex_cmd> <output.shp> <raster>...`
pub struct GdalTindex {
    cmd: String,
    env: GdalEnv,
}

impl GdalTindex {
    pub fn new (cmd: impl ToString, env: GdalEnv)->Self {
        GdalTindex { cmd: cmd.to_string(), env }
    }

    pub fn from_config (config: &GdalConfig)->Result<Self> {
        let env = GdalEnv::new( config, std::env::var_os("PATH"))?;
        Ok( GdalTindex::new( &config.tindex_cmd, env))
    }
}

#[async_trait]
impl SpatialIndexer for GdalTindex {
    async fn create_index (&self, request: &IndexRequest)->Result<IndexOutcome> {
        let rasters = request.source.rasters().await?;

        let mut cmd = Command::new( &self.cmd);
        cmd.arg( request.output.as_os_str())
            .args( rasters.iter().map( |p| p.as_os_str()))
            .stdin( Stdio::null())
            .stdout( Stdio::piped())
            .stderr( Stdio::piped())
            .kill_on_drop(true); // this is what terminates the child if we time out
        self.env.apply( &mut cmd);

        debug!("executing {cmd:?}");
        let output = match tokio::time::timeout( request.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err( index_failed( format!("failed to execute {}: {e}", self.cmd))),
            Err(_) => {
                warn!("{} did not finish within {:?}", self.cmd, request.timeout);
                return Err( OdinWebOdmError::IndexTimeout( request.timeout))
            }
        };

        let stdout = String::from_utf8_lossy( &output.stdout).into_owned();
        let stderr = String::from_utf8_lossy( &output.stderr).into_owned();
        if !stderr.trim().is_empty() { debug!("{} stderr: {}", self.cmd, stderr.trim()) }

        if !output.status.success() {
            return Err( index_failed( format!("{} exited with {}: {}", self.cmd, output.status, stderr.trim())))
        }
        if !request.output.is_file() {
            return Err( index_failed( format!("{} did not create {:?}", self.cmd, request.output)))
        }

        let companions = shapefile_companions( &request.output);
        info!("created spatial index {:?} for {} raster(s)", request.output, rasters.len());

        Ok( IndexOutcome { shapefile: request.output.clone(), companions, stdout, stderr })
    }
}

/// the companion files of `shapefile` that actually exist
pub fn shapefile_companions (shapefile: &Path)->Vec<PathBuf> {
    SHAPEFILE_COMPANION_EXTS.iter()
        .map( |ext| shapefile.with_extension(ext))
        .filter( |p| p.is_file())
        .collect()
}
