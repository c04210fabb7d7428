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
//! derive a single 0..100 progress value and a stage label from a WebODM task record.
//!
//! While a task is running the overall progress is a weighted sum of its three sub-progress
//! fractions (upload 30%, resize 20%, processing 50%). Terminal and queued states map to fixed values.

use serde::Serialize;

use crate::webodm::{Task, TaskStatus};

pub const UPLOAD_WEIGHT: f64 = 30.0;
pub const RESIZE_WEIGHT: f64 = 20.0;
pub const RUNNING_WEIGHT: f64 = 50.0;

#[derive(Debug,Clone,PartialEq,Serialize)]
pub struct ProgressEstimate {
    pub progress: u32,
    pub stage: String,
    pub is_complete: bool,
    pub has_error: bool,
}

fn fraction (v: Option<f64>)->f64 {
    match v {
        Some(f) if f.is_finite() => f.clamp( 0.0, 1.0),
        _ => 0.0
    }
}

/// rounded percentage of a (clamped) sub-progress fraction
pub fn percent (v: Option<f64>)->u32 {
    (fraction(v) * 100.0).round() as u32
}

pub fn estimate_progress (task: &Task)->ProgressEstimate {
    let (progress, stage, is_complete, has_error) = match task.status {
        Some(TaskStatus::Completed) => (100, "Complete".to_string(), true, false),
        Some(TaskStatus::Failed) => (0, "Failed".to_string(), false, true),
        Some(TaskStatus::Running) => {
            let upload = fraction( task.upload_progress);
            let resize = fraction( task.resize_progress);
            let running = fraction( task.running_progress);

            let progress = (upload * UPLOAD_WEIGHT + resize * RESIZE_WEIGHT + running * RUNNING_WEIGHT).round() as u32;
            let stage = if upload < 1.0 {
                "Uploading images..."
            } else if resize < 1.0 {
                "Resizing images..."
            } else {
                "Processing orthophoto..."
            };
            (progress, stage.to_string(), false, false)
        }
        Some(TaskStatus::Queued) => (0, "Queued for processing".to_string(), false, false),
        Some(TaskStatus::Canceled) => (0, "Canceled".to_string(), false, false),
        Some(TaskStatus::Other(code)) => (0, format!("Status: {code}"), false, false),
        None => (0, "Status: unknown".to_string(), false, false),
    };

    ProgressEstimate { progress, stage, is_complete, has_error }
}

/// the task-progress response
#[derive(Debug,Clone,Serialize)]
pub struct TaskProgressReport {
    pub task_id: String,
    pub project_id: String,
    pub status: Option<TaskStatus>,
    pub stage: String,
    pub progress: u32,
    pub upload_progress: u32,
    pub resize_progress: u32,
    pub running_progress: u32,
    pub processing_time: Option<i64>,
    pub is_complete: bool,
    pub has_error: bool,
    pub last_error: Option<String>,
    pub images_count: Option<u64>,
    pub name: Option<String>,
    pub created_at: Option<String>,
    pub raw_data: Task,
}

impl TaskProgressReport {
    pub fn new (project_id: &str, task: Task)->Self {
        let est = estimate_progress( &task);

        TaskProgressReport {
            task_id: task.id.clone(),
            project_id: project_id.to_string(),
            status: task.status,
            stage: est.stage,
            progress: est.progress,
            upload_progress: percent( task.upload_progress),
            resize_progress: percent( task.resize_progress),
            running_progress: percent( task.running_progress),
            processing_time: task.processing_time,
            is_complete: est.is_complete,
            has_error: est.has_error,
            last_error: task.last_error.clone(),
            images_count: task.images_count,
            name: task.name.clone(),
            created_at: task.created_at.clone(),
            raw_data: task,
        }
    }
}
