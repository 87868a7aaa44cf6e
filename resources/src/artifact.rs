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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::primitives::Id;

/// Content addressed reference to a stored blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditArtifact {
    pub id: Id,
    pub tenant_id: Id,
    pub document_id: Id,
    pub artifact_type: ArtifactType,
    pub storage_path: String,
    pub sha256: String,
    pub size: usize,
    pub mime: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    SignatureImage,
    SignedPdf,
    DetachedSignature,
    TimestampToken,
    FinalReport,
}
