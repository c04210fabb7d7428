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
//! the startup configuration of the bridge. This is read once from a RON file (if any), then
//! amended by environment variables and passed into the router state - there are no globals.

use std::{collections::BTreeMap, net::SocketAddr, path::{Path, PathBuf}, time::Duration};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::errors::{config_error, Result};
use crate::webodm::TaskOption;

const MIB: u64 = 1024 * 1024;

#[derive(Deserialize,Serialize,Debug,Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub webodm: WebOdmConfig,
    pub gdal: GdalConfig,
    pub uploads: UploadConfig,

    /// JSON file with `{ "<map name>": "<destination dir>" }` entries
    pub mappings_path: String,

    /// task options sent with each new task unless the client overrides them by name
    pub default_task_options: Vec<TaskOption>,
}

impl Default for BridgeConfig {
    fn default()->Self {
        BridgeConfig {
            server: ServerConfig::default(),
            webodm: WebOdmConfig::default(),
            gdal: GdalConfig::default(),
            uploads: UploadConfig::default(),
            mappings_path: "data/map_mappings.json".to_string(),
            default_task_options: default_task_options(),
        }
    }
}

pub fn default_task_options()->Vec<TaskOption> {
    vec![
        TaskOption::new( "fast-orthophoto", json!(true)),
        TaskOption::new( "resize-to", json!(1024)),
        TaskOption::new( "quality", json!("medium")),
        TaskOption::new( "pc-quality", json!("medium")),
        TaskOption::new( "orthophoto-resolution", json!(5)),
    ]
}

#[derive(Deserialize,Serialize,Debug,Clone)]
pub struct ServerConfig {
    pub sock_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default()->Self {
        ServerConfig { sock_addr: SocketAddr::from( ([0,0,0,0], 7789)) }
    }
}

impl ServerConfig {
    pub fn url (&self)->String {
        format!("http://{}", self.sock_addr)
    }
}

#[derive(Deserialize,Serialize,Clone)]
#[serde(default)]
pub struct WebOdmConfig {
    /// server root, the `/api/..` endpoint paths are appended to it
    pub url: String,
    pub username: String,
    pub password: String,

    /// applies to JSON requests only - uploads and downloads are not bounded
    pub request_timeout_secs: u64,
}

impl Default for WebOdmConfig {
    fn default()->Self {
        WebOdmConfig {
            url: "http://localhost:8000".to_string(),
            username: String::new(),
            password: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl WebOdmConfig {
    pub fn request_timeout (&self)->Duration { Duration::from_secs( self.request_timeout_secs) }
}

// don't leak the password into logs
impl std::fmt::Debug for WebOdmConfig {
    fn fmt (&self, f: &mut std::fmt::Formatter<'_>)->std::fmt::Result {
        f.debug_struct("WebOdmConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() {"<not set>"} else {"***"})
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// the local GDAL toolchain. If `root` is set the tool runs with a PATH and environment
/// assembled from it (e.g. for MS4W or OSGeo4W installations), otherwise the tool is looked up
/// in the inherited PATH
#[derive(Deserialize,Serialize,Debug,Clone)]
#[serde(default)]
pub struct GdalConfig {
    pub root: Option<String>,
    pub tindex_cmd: String,

    /// directories relative to `root` that are prepended to PATH
    pub path_dirs: Vec<String>,

    /// additional environment vars, each occurrence of `{root}` in values is replaced with `root`
    pub env: BTreeMap<String,String>,

    pub timeout_secs: u64,
}

impl Default for GdalConfig {
    fn default()->Self {
        let path_dirs = ["bin", "tools/gdal-ogr", "tools/proj", "Python", "Python/Scripts"]
            .iter().map(|s| s.to_string()).collect();

        let env = [
            ("GDAL_DATA", "{root}/gdaldata"),
            ("GDAL_DRIVER_PATH", "{root}/gdalplugins"),
            ("PROJ_DATA", "{root}/share/proj"),
            ("PROJ_USER_WRITABLE_DIRECTORY", "{root}/share/proj"),
            ("PYTHONHOME", "{root}/Python"),
            ("USE_PATH_FOR_GDAL_PYTHON", "YES"),
            ("PYTHONUTF8", "1"),
            ("GDAL_FILENAME_IS_UTF8", "1"),
            ("VSI_CACHE", "TRUE"),
            ("VSI_CACHE_SIZE", "1000000"),
        ].iter().map( |(k,v)| (k.to_string(), v.to_string())).collect();

        GdalConfig {
            root: None,
            tindex_cmd: "gdaltindex".to_string(),
            path_dirs,
            env,
            timeout_secs: 60,
        }
    }
}

impl GdalConfig {
    pub fn timeout (&self)->Duration { Duration::from_secs( self.timeout_secs) }
}

/// ceilings for multipart image uploads. Exceeding any of them is a client error
#[derive(Deserialize,Serialize,Debug,Clone)]
#[serde(default)]
pub struct UploadConfig {
    /// where received images are stored until they are forwarded to WebODM
    pub dir: String,
    pub max_file_size: u64,
    pub max_files: usize,
    pub max_total_size: u64,
    pub max_field_size: u64,
}

impl Default for UploadConfig {
    fn default()->Self {
        UploadConfig {
            dir: "uploads".to_string(),
            max_file_size: 500 * MIB,
            max_files: 1000,
            max_total_size: 20 * 1024 * MIB,
            max_field_size: 100 * MIB,
        }
    }
}

impl BridgeConfig {
    /// load config from an optional RON file, then apply environment overrides.
    /// A missing file is an error only if the path was explicitly given
    pub fn load (path: Option<&Path>)->Result<BridgeConfig> {
        let mut config = match path {
            Some(path) => {
                if !path.is_file() { return Err( config_error( format!("config file not found: {path:?}"))) }
                info!("loading config from {path:?}");
                let data = std::fs::read(path)?;
                ron::de::from_bytes::<BridgeConfig>( &data)?
            }
            None => {
                debug!("no config file given, using defaults");
                BridgeConfig::default()
            }
        };

        config.apply_env_overrides( |key| std::env::var(key).ok());
        config.expand_paths( |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_overrides<F> (&mut self, env: F) where F: Fn(&str)->Option<String> {
        if let Some(url) = env("WEBODM_URL") { self.webodm.url = url }
        if let Some(username) = env("WEBODM_USERNAME") { self.webodm.username = username }
        if let Some(password) = env("WEBODM_PASSWORD") { self.webodm.password = password }

        if let Some(root) = env("GDAL_ROOT").or_else(|| env("MS4W_ROOT")).or_else(|| env("OSGEO4W_ROOT")) {
            self.gdal.root = Some(root)
        }

        if let Some(path) = env("MAPPINGS_PATH") { self.mappings_path = path }

        if let Some(port) = env("PORT").and_then( |p| p.parse::<u16>().ok()) {
            self.server.sock_addr.set_port(port)
        }
    }

    /// expand `$VAR` / `${VAR}` references in configured path names
    pub fn expand_paths<F> (&mut self, env: F) where F: Fn(&str)->Option<String> {
        self.mappings_path = env_expand( &self.mappings_path, &env);
        self.uploads.dir = env_expand( &self.uploads.dir, &env);
        if let Some(root) = self.gdal.root.take() {
            self.gdal.root = Some( env_expand( &root, &env))
        }
    }

    pub fn mappings_path (&self)->PathBuf { PathBuf::from( &self.mappings_path) }
    pub fn upload_dir (&self)->PathBuf { PathBuf::from( &self.uploads.dir) }
}

lazy_static! {
    static ref ENV_VAR_RE: Regex = Regex::new( r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// replace `$VAR` and `${VAR}` with the value provided by `env`. Undefined variables expand to ""
pub fn env_expand<F> (s: &str, env: F)->String where F: Fn(&str)->Option<String> {
    ENV_VAR_RE.replace_all( s, |caps: &Captures| {
        let key = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
        env(key).unwrap_or_default()
    }).into_owned()
}
