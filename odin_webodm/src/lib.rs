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
//! a bridge service between map serving clients and a [WebODM](https://www.opendronemap.org/webodm/)
//! photogrammetry server. It forwards drone image uploads as WebODM processing tasks, reports task
//! progress, manages projects, and publishes finished orthophotos (plus a `gdaltindex` generated
//! spatial index) into directories of a local map server.

use std::net::SocketAddr;
use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

pub mod errors;
pub use errors::{OdinWebOdmError, Result};

pub mod config;
pub use config::{BridgeConfig, GdalConfig, ServerConfig, UploadConfig, WebOdmConfig};

pub mod webodm;
pub use webodm::{Project, Task, TaskOption, TaskStatus, WebOdmApi, WebOdmClient};

pub mod uploads;
pub mod progress;
pub mod mappings;
pub mod gdal;
pub mod submit;
pub mod commit;

pub mod server;
pub use server::{build_router, AppState};

/// run the server on the configured socket address until it terminates
pub fn spawn_server_task (config: &ServerConfig, router: Router)->JoinHandle<Result<()>> {
    let sock_addr = config.sock_addr;
    let url = config.url();

    tokio::spawn( async move {
        let listener = tokio::net::TcpListener::bind( sock_addr).await?;
        info!("serving WebODM bridge on {url}/api");
        axum::serve( listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
        Ok(())
    })
}
