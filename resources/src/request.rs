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

use super::{party::Channel, primitives::Id};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub id: Id,
    pub tenant_id: Id,
    pub instance_id: Id,
    pub step_id: Id,
    pub document_id: Id,
    pub party_id: Id,
    pub status: Status,
    pub token_hash: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub token_channel: Channel,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Sent,
    Signed,
    Refused,
    Delegated,
    Expired,
}

impl Status {
    /// Only pending or sent requests accept a sign/refuse action.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

impl SignatureRequest {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}
