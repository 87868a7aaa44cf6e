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
pub struct AuditEvent {
    pub id: Id,
    pub tenant_id: Id,
    pub document_id: Id,
    pub text: Option<String>,
    pub action: Action,
    pub recorded: DateTime<Utc>,
    pub outcome: Outcome,
    pub outcome_description: Option<String>,
    pub agent: Agent,
    pub entity: Option<Id>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub type_: AgentType,
    pub who: Option<Id>,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AgentType {
    User,
    Signer,
    System,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Action {
    Dispatch,
    NotificationSent,
    NotificationFailed,
    TokenGraceUsed,
    Sign,
    Refuse,
    Complete,
    Expire,
    Reject,
    Finalize,
    FinalizeFailed,
    Resend,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    MinorFailure,
    SeriousFailure,
}

impl Agent {
    pub fn system() -> Self {
        Self {
            type_: AgentType::System,
            who: None,
            name: "system".into(),
        }
    }

    pub fn signer(party_id: Id, name: String) -> Self {
        Self {
            type_: AgentType::Signer,
            who: Some(party_id),
            name,
        }
    }

    pub fn user(user_id: Id) -> Self {
        Self {
            type_: AgentType::User,
            name: format!("User/{}", user_id),
            who: Some(user_id),
        }
    }
}
