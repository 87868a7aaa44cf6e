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

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Id,
    pub tenant_id: Id,
    pub name: String,
    pub status: Status,
    pub created_by: Id,
    pub group_id: Option<Id>,
    pub current_version_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: Id,
    pub document_id: Id,
    pub number: u32,
    pub kind: VersionKind,
    pub filename: String,
    pub storage_path: String,
    pub sha256: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

/// A placement on a document version that a role has to fill in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: Id,
    pub document_id: Id,
    pub version_id: Id,
    pub role: String,
    pub field_type: FieldType,
    pub label: Option<String>,
    pub required: bool,
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    Draft,
    InReview,
    InProgress,
    Completed,
    Rejected,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum VersionKind {
    Original,
    Final,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    TypedName,
    SignatureImage,
    Date,
    Text,
}

impl Status {
    /// Documents may only be dispatched for signature from these states.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::Draft | Self::InReview)
    }
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Field {
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.trim().to_owned(),
            _ => format!("{:?}#{}", self.field_type, self.id),
        }
    }
}
