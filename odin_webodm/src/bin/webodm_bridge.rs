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
//! the WebODM bridge server executable
//!
//!     webodm_bridge [--config <ron-file>]
//!
//! Without a config file the server runs on defaults, which can be amended by the environment
//! vars `WEBODM_URL`, `WEBODM_USERNAME`, `WEBODM_PASSWORD`, `GDAL_ROOT`, `MAPPINGS_PATH` and `PORT`.

use std::path::PathBuf;
use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use odin_webodm::{build_router, spawn_server_task, AppState, BridgeConfig};

#[derive(Parser,Debug)]
#[command(version, about = "bridge between map servers and a WebODM instance")]
struct Args {
    /// RON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main ()->Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter( EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = BridgeConfig::load( args.config.as_deref())?;
    info!("WebODM server: {:?}", config.webodm);

    if config.webodm.username.is_empty() || config.webodm.password.is_empty() {
        warn!("no WebODM credentials configured, token requests will fail");
    }
    if !config.mappings_path().is_file() {
        warn!("map mappings file {:?} does not exist (yet)", config.mappings_path());
    }

    let server_config = config.server.clone();
    let router = build_router( AppState::from_config( config)?);

    println!("serving on {}/api (terminate with ctrl-C)", server_config.url());
    let server_task = spawn_server_task( &server_config, router);
    Ok( server_task.await?? )
}
