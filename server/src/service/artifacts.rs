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

use chrono::{DateTime, Utc};
use miscellaneous::digest::sha256_hex;
use resources::{
    artifact::{ArtifactType, AuditArtifact},
    primitives::Id,
};

use crate::{external::BlobStore, state::Inner};

use super::Error;

#[derive(Clone, Default)]
pub struct Artifacts {
    by_id: HashMap<Id, AuditArtifact>,
}

impl Artifacts {
    pub fn insert(&mut self, artifact: AuditArtifact) {
        self.by_id.insert(artifact.id.clone(), artifact);
    }

    pub fn get(&self, id: &Id) -> Option<&AuditArtifact> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditArtifact> {
        self.by_id.values()
    }

    pub fn for_document(&self, document_id: &Id, type_: ArtifactType) -> Vec<&AuditArtifact> {
        let mut ret = self
            .by_id
            .values()
            .filter(|a| &a.document_id == document_id && a.artifact_type == type_)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        ret
    }
}

/// Description of a blob to be stored as an audit artifact.
pub struct ArtifactBlob<'a> {
    pub tenant_id: &'a Id,
    pub document_id: &'a Id,
    pub artifact_type: ArtifactType,
    pub root: &'a str,
    pub extension: &'a str,
    pub mime: &'a str,
    pub data: &'a [u8],
}

impl Inner {
    /// Stores the blob content addressed below `root` and records it as an
    /// artifact of the document.
    pub fn artifact_store(
        &mut self,
        blob_store: &dyn BlobStore,
        blob: ArtifactBlob<'_>,
        now: DateTime<Utc>,
    ) -> Result<AuditArtifact, Error> {
        let sha256 = sha256_hex(blob.data);
        let name = format!("{}.{}", sha256, blob.extension);
        let storage_path = blob_store.save_bytes(blob.root, &name, blob.data)?;

        let artifact = AuditArtifact {
            id: Id::generate(),
            tenant_id: blob.tenant_id.clone(),
            document_id: blob.document_id.clone(),
            artifact_type: blob.artifact_type,
            storage_path,
            sha256,
            size: blob.data.len(),
            mime: blob.mime.to_owned(),
            created_at: now,
        };

        self.artifacts.insert(artifact.clone());

        Ok(artifact)
    }
}
