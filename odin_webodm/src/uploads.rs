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
//! receiving multipart image uploads into temporary files.
//!
//! Each received image is backed by a [`TempPath`], i.e. it gets removed when the batch is dropped
//! even if the request bails out early. [`UploadBatch::cleanup`] does the same explicitly and logs
//! files that could not be removed without stopping at the first failure.

use std::path::{Path, PathBuf};
use axum::extract::multipart::{Field, Multipart};
use mime::Mime;
use tempfile::{Builder as TempFileBuilder, TempPath};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::errors::{invalid_param, limit_exceeded, Result};

pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug)]
pub struct UploadedImage {
    path: TempPath,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

impl UploadedImage {
    /// wrap an image file that is already on disk. The file is removed when the image is dropped
    pub fn new (path: TempPath, file_name: impl ToString, content_type: impl ToString)->Result<Self> {
        let size = std::fs::metadata( &path)?.len();
        let content_type = upload_content_type( Some( &content_type.to_string()));
        Ok( UploadedImage { path, file_name: file_name.to_string(), content_type, size })
    }

    pub fn path (&self)->&Path { &self.path }
}

#[derive(Debug,Default)]
pub struct UploadBatch {
    images: Vec<UploadedImage>,
}

impl UploadBatch {
    pub fn images (&self)->&[UploadedImage] { &self.images }
    pub fn len (&self)->usize { self.images.len() }
    pub fn is_empty (&self)->bool { self.images.is_empty() }

    pub fn total_size (&self)->u64 {
        self.images.iter().map( |img| img.size).sum()
    }

    fn push (&mut self, img: UploadedImage) { self.images.push(img) }

    /// remove all temp files. Failures are logged and do not abort removal of the remaining files.
    /// Returns the number of files that were removed
    pub fn cleanup (mut self)->usize {
        let n_total = self.images.len();
        let mut n_removed = 0;

        for img in self.images.drain(..) {
            let path = img.path().to_path_buf();
            match img.path.close() {
                Ok(()) => n_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to delete temp file {path:?}: {e}")
            }
        }

        if n_total > 0 { debug!("removed {n_removed} of {n_total} temporary upload files") }
        n_removed
    }
}

/// the parsed push-images form
#[derive(Debug,Default)]
pub struct UploadForm {
    pub images: UploadBatch,
    pub project_name: Option<String>,
    pub options: Option<String>,
}

/// store all image parts of a multipart body in `limits.dir` and collect the text fields.
/// Limits are enforced while streaming so that oversized requests never hit the disk in full
pub async fn receive_upload (mut multipart: Multipart, limits: &UploadConfig)->Result<UploadForm> {
    let dir = PathBuf::from( &limits.dir);
    if !dir.is_dir() {
        tokio::fs::create_dir_all( &dir).await?;
    }

    let mut form = UploadForm::default();
    let mut total_size: u64 = 0;

    while let Some(field) = multipart.next_field().await.map_err( |e| invalid_param( format!("malformed multipart body: {e}")))? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "images" | "images[]" => {
                if form.images.len() >= limits.max_files {
                    return Err( limit_exceeded( format!("more than {} files", limits.max_files)))
                }
                let idx = form.images.len() + 1;
                if let Some(img) = receive_image( field, &dir, idx, limits, &mut total_size).await? {
                    form.images.push( img);
                }
            }
            "project_name" => {
                let value = read_text_field( field, limits.max_field_size).await?;
                let value = value.trim();
                if !value.is_empty() { form.project_name = Some( value.to_string()) }
            }
            "options" => {
                let value = read_text_field( field, limits.max_field_size).await?;
                if !value.trim().is_empty() { form.options = Some(value) }
            }
            other => {
                debug!("ignoring multipart field {other:?}");
            }
        }
    }

    if !form.images.is_empty() {
        info!("received {} images ({:.2} MB)", form.images.len(), form.images.total_size() as f64 / (1024.0 * 1024.0));
    }
    Ok(form)
}

async fn receive_image (mut field: Field<'_>, dir: &Path, idx: usize, limits: &UploadConfig, total_size: &mut u64)->Result<Option<UploadedImage>> {
    let client_file_name = field.file_name().map( sanitize_file_name);
    let content_type = upload_content_type( field.content_type());

    let (file, path) = TempFileBuilder::new().prefix("upload_").tempfile_in( dir)?.into_parts();
    let mut file = tokio::fs::File::from_std( file);
    let mut size: u64 = 0;

    // note that `path` removes the file if we return early
    while let Some(chunk) = field.chunk().await.map_err( |e| invalid_param( format!("failed to read upload: {e}")))? {
        size += chunk.len() as u64;
        *total_size += chunk.len() as u64;

        if size > limits.max_file_size {
            return Err( limit_exceeded( format!("file exceeds {} bytes", limits.max_file_size)))
        }
        if *total_size > limits.max_total_size {
            return Err( limit_exceeded( format!("upload exceeds {} bytes", limits.max_total_size)))
        }
        file.write_all( &chunk).await?;
    }
    file.flush().await?;

    // browsers send an empty, unnamed part if no file was selected
    if size == 0 && client_file_name.is_none() {
        return Ok(None)
    }

    let file_name = client_file_name.unwrap_or_else( || format!("image_{idx}.jpg"));
    Ok( Some( UploadedImage { path, file_name, content_type, size }))
}

async fn read_text_field (mut field: Field<'_>, max_size: u64)->Result<String> {
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err( |e| invalid_param( format!("failed to read form field: {e}")))? {
        if (buf.len() + chunk.len()) as u64 > max_size {
            return Err( limit_exceeded( format!("form field exceeds {max_size} bytes")))
        }
        buf.extend_from_slice( &chunk);
    }
    String::from_utf8( buf).map_err( |_| invalid_param("form field is not valid UTF-8"))
}

/// the content type we forward to WebODM. Missing or unparsable types are replaced by [`DEFAULT_CONTENT_TYPE`]
pub fn upload_content_type (content_type: Option<&str>)->String {
    match content_type.map( str::trim) {
        Some(ct) if ct.parse::<Mime>().is_ok() => ct.to_string(),
        Some(ct) => {
            debug!("replacing invalid content type {ct:?} with {DEFAULT_CONTENT_TYPE}");
            DEFAULT_CONTENT_TYPE.to_string()
        }
        None => DEFAULT_CONTENT_TYPE.to_string()
    }
}

/// only keep the last path element of client supplied file names
pub fn sanitize_file_name (name: &str)->String {
    let name = name.rsplit( ['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." { "image.jpg".to_string() } else { name.to_string() }
}
