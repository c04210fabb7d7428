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
use std::path::Path;
use anyhow::Result;
use odin_webodm::{
    errors::OdinWebOdmError,
    mappings::{load_mappings, MapMappings},
    submit::{poll_url, task_name, UploadStats},
    uploads::{sanitize_file_name, upload_content_type, UploadBatch, DEFAULT_CONTENT_TYPE},
};

#[tokio::test]
async fn test_load_mappings()->Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("map_mappings.json");
    std::fs::write( &path, r#"{ "survey": "/srv/maps/survey", "basemap": "/srv/maps/base" }"#)?;

    let mappings = load_mappings( &path).await?;
    assert_eq!( mappings.names(), vec!["basemap", "survey"]);
    assert_eq!( mappings.resolve("survey")?, Path::new("/srv/maps/survey"));

    match mappings.resolve("Survey") {
        Err(OdinWebOdmError::MapNotFound { name, available }) => {
            assert_eq!( name, "Survey");
            assert_eq!( available, vec!["basemap", "survey"]);
        }
        other => panic!("expected map not found, got {other:?}")
    }
    Ok(())
}

#[tokio::test]
async fn test_unreadable_mappings()->Result<()> {
    let dir = tempfile::tempdir()?;

    let missing = load_mappings( dir.path().join("nope.json")).await;
    assert!( matches!( missing, Err(OdinWebOdmError::MappingsUnreadable{..})));

    let path = dir.path().join("bad.json");
    std::fs::write( &path, r#"["survey"]"#)?;
    match load_mappings( &path).await {
        Err(e @ OdinWebOdmError::MappingsUnreadable{..}) => assert_eq!( e.code(), "mapping_file_unreadable"),
        other => panic!("expected unreadable mappings, got {other:?}")
    }
    Ok(())
}

#[test]
fn test_mappings_from_entries() {
    let mappings = MapMappings::from_entries( [("a", "/tmp/a")]);
    assert_eq!( mappings.dest_dir("a"), Some( Path::new("/tmp/a")));
    assert_eq!( mappings.dest_dir("b"), None);
}

#[test]
fn test_upload_content_type() {
    assert_eq!( upload_content_type( Some("image/png")), "image/png");
    assert_eq!( upload_content_type( Some(" image/tiff ")), "image/tiff");
    for bad in ["", "jpeg", "not a mime type"] {
        assert_eq!( upload_content_type( Some(bad)), DEFAULT_CONTENT_TYPE, "{bad:?}");
    }
    assert_eq!( upload_content_type( None), DEFAULT_CONTENT_TYPE);
}

#[test]
fn test_sanitize_file_name() {
    assert_eq!( sanitize_file_name("DJI_0001.JPG"), "DJI_0001.JPG");
    assert_eq!( sanitize_file_name("../../etc/passwd"), "passwd");
    assert_eq!( sanitize_file_name("C:\\photos\\IMG_7.jpg"), "IMG_7.jpg");
    assert_eq!( sanitize_file_name("dir/"), "image.jpg");
    assert_eq!( sanitize_file_name(".."), "image.jpg");
}

#[test]
fn test_empty_batch_cleanup() {
    let batch = UploadBatch::default();
    assert!( batch.is_empty());
    assert_eq!( batch.total_size(), 0);
    assert_eq!( batch.cleanup(), 0);
}

#[test]
fn test_upload_stats() {
    let stats = UploadStats::new( 3, 10 * 1024 * 1024);
    assert_eq!( stats.image_count, 3);
    assert_eq!( stats.total_size_mb, 10.0);
    assert_eq!( stats.average_size_mb, 3.33);

    let ts = chrono::DateTime::parse_from_rfc3339("2026-10-17T08:15:42Z").map( |t| t.with_timezone( &chrono::Utc));
    let ts = match ts { Ok(ts) => ts, Err(e) => panic!("bad timestamp: {e}") };
    assert_eq!( task_name( &stats, ts), "Upload_3imgs_10.00MB_2026-10-17T08-15-42");

    assert_eq!( poll_url( "abc", 7), "/api/task-progress?task_id=abc&project_id=7");
}
