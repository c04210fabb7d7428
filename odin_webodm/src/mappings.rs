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
//! the static map name -> destination directory table. It is owned by the map serving side and
//! only read here, hence we load it fresh for each commit and never cache it.

use std::{collections::BTreeMap, path::{Path, PathBuf}};
use serde::Deserialize;

use crate::errors::{OdinWebOdmError, Result};

#[derive(Debug,Clone,Default,Deserialize)]
#[serde(transparent)]
pub struct MapMappings {
    entries: BTreeMap<String,PathBuf>,
}

impl MapMappings {
    pub fn from_entries<I,K,V> (entries: I)->Self where I: IntoIterator<Item=(K,V)>, K: ToString, V: Into<PathBuf> {
        MapMappings { entries: entries.into_iter().map( |(k,v)| (k.to_string(), v.into())).collect() }
    }

    pub fn dest_dir (&self, map_name: &str)->Option<&Path> {
        self.entries.get( map_name).map( |p| p.as_path())
    }

    pub fn names (&self)->Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// look up `map_name`, reporting the available names if there is no such map
    pub fn resolve (&self, map_name: &str)->Result<&Path> {
        self.dest_dir( map_name).ok_or_else( || OdinWebOdmError::MapNotFound {
            name: map_name.to_string(),
            available: self.names()
        })
    }
}

pub async fn load_mappings (path: impl AsRef<Path>)->Result<MapMappings> {
    let path = path.as_ref();
    let unreadable = |details: String| OdinWebOdmError::MappingsUnreadable { path: path.to_path_buf(), details };

    let data = tokio::fs::read( path).await.map_err( |e| unreadable( e.to_string()))?;
    serde_json::from_slice( &data).map_err( |e| unreadable( e.to_string()))
}
