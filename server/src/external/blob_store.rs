/*
 * Copyright (c) 2021 gematik GmbH
 * 
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * 
 *    http://www.apache.org/licenses/LICENSE-2.0
 * 
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::collections::HashMap;
use std::fs::{create_dir_all, read, write};
use std::io::Error as IoError;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Storage for evidence and document blobs. Names are chosen by the caller
/// (sha256 based), so saving the same content twice is harmless.
pub trait BlobStore: Send + Sync {
    fn save_bytes(&self, root: &str, name: &str, data: &[u8]) -> Result<String, BlobError>;
    fn load_bytes(&self, path: &str) -> Result<Vec<u8>, BlobError>;
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("IO Error: {0}")]
    IoError(IoError),

    #[error("Invalid Blob Path: {0}!")]
    InvalidPath(String),

    #[error("Blob Not Found: {0}!")]
    NotFound(String),

    #[error("Blob Store Unavailable!")]
    Unavailable,
}

pub struct FsBlobStore {
    base: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        check_path(path)?;

        Ok(self.base.join(path))
    }
}

impl BlobStore for FsBlobStore {
    fn save_bytes(&self, root: &str, name: &str, data: &[u8]) -> Result<String, BlobError> {
        let path = join(root, name)?;
        let file = self.resolve(&path)?;

        if let Some(parent) = file.parent() {
            create_dir_all(parent)?;
        }
        write(&file, data)?;

        Ok(path)
    }

    fn load_bytes(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let file = self.resolve(path)?;
        if !file.exists() {
            return Err(BlobError::NotFound(path.into()));
        }

        Ok(read(file)?)
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn save_bytes(&self, root: &str, name: &str, data: &[u8]) -> Result<String, BlobError> {
        let path = join(root, name)?;
        let mut blobs = self.blobs.lock().map_err(|_| BlobError::Unavailable)?;
        blobs.insert(path.clone(), data.to_vec());

        Ok(path)
    }

    fn load_bytes(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let blobs = self.blobs.lock().map_err(|_| BlobError::Unavailable)?;

        blobs
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.into()))
    }
}

impl From<IoError> for BlobError {
    fn from(err: IoError) -> Self {
        Self::IoError(err)
    }
}

fn join(root: &str, name: &str) -> Result<String, BlobError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(BlobError::InvalidPath(name.into()));
    }

    let path = format!("{}/{}", root.trim_end_matches('/'), name);
    check_path(&path)?;

    Ok(path)
}

fn check_path(path: &str) -> Result<(), BlobError> {
    let valid = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));

    if valid && !path.is_empty() {
        Ok(())
    } else {
        Err(BlobError::InvalidPath(path.into()))
    }
}
