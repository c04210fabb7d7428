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
//! forwarding uploaded images as a new WebODM processing task

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::config::BridgeConfig;
use crate::errors::{missing_param, Result};
use crate::uploads::UploadForm;
use crate::webodm::{merge_task_options, parse_task_options, resolve_project_by_name, Task, TaskSubmission, WebOdmApi};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug,Clone,Serialize)]
pub struct UploadStats {
    pub image_count: usize,
    pub total_size_mb: f64,
    pub average_size_mb: f64,
}

impl UploadStats {
    pub fn new (image_count: usize, total_size: u64)->Self {
        let total_mb = total_size as f64 / MB;
        let average_mb = if image_count > 0 { total_mb / image_count as f64 } else { 0.0 };
        UploadStats { image_count, total_size_mb: round2(total_mb), average_size_mb: round2(average_mb) }
    }
}

fn round2 (v: f64)->f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug,Clone,Serialize)]
pub struct SubmissionResult {
    pub task: Task,
    pub message: String,
    pub poll_url: String,
    pub stats: UploadStats,
}

/// `Upload_<n>imgs_<MB>MB_<YYYY-MM-DDTHH-MM-SS>` (UTC)
pub fn task_name (stats: &UploadStats, timestamp: chrono::DateTime<Utc>)->String {
    format!("Upload_{}imgs_{:.2}MB_{}", stats.image_count, stats.total_size_mb, timestamp.format("%Y-%m-%dT%H-%M-%S"))
}

pub fn poll_url (task_id: &str, project_id: u64)->String {
    format!("/api/task-progress?task_id={task_id}&project_id={project_id}")
}

/// submit the received images to the project named in the form. Nothing is sent to WebODM
/// unless there are images and a project name. This does not remove the uploaded files, which is
/// the responsibility of whoever owns the form
pub async fn submit_images (webodm: &dyn WebOdmApi, config: &BridgeConfig, form: &UploadForm)->Result<SubmissionResult> {
    if form.images.is_empty() { return Err( missing_param("Images array")) }
    let Some(project_name) = &form.project_name else { return Err( missing_param("project_name")) };

    let stats = UploadStats::new( form.images.len(), form.images.total_size());
    info!("processing {} images ({:.2} MB) for project {project_name}", stats.image_count, stats.total_size_mb);

    let token = webodm.get_token().await?;
    let projects = webodm.list_projects( &token).await?;
    let project = resolve_project_by_name( project_name, &projects)?;

    let user_options = form.options.as_deref().and_then( parse_task_options).unwrap_or_default();
    let options = merge_task_options( &config.default_task_options, &user_options);

    let submission = TaskSubmission {
        name: task_name( &stats, Utc::now()),
        options,
        images: form.images.images(),
    };
    let task = webodm.create_task( &token, project.id, &submission).await?;
    info!("created task {} ({}) in project {}", task.id, submission.name, project.id);

    Ok( SubmissionResult {
        message: format!("Task created successfully with {} images ({:.2}MB)", stats.image_count, stats.total_size_mb),
        poll_url: poll_url( &task.id, project.id),
        task,
        stats,
    })
}
