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

use super::{
    primitives::Id,
    template::{ExecutionMode, StepAction},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Id,
    pub tenant_id: Id,
    pub document_id: Id,
    pub group_document_ids: Vec<Id>,
    pub template_id: Option<Id>,
    pub status: Status,
    pub is_group_workflow: bool,
    pub created_by: Id,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Id,
    pub instance_id: Id,
    pub party_id: Id,
    pub step_index: u32,
    pub phase_index: u32,
    pub execution_type: ExecutionMode,
    pub action: StepAction,
    pub deadline_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    Draft,
    InProgress,
    Completed,
    Rejected,
    Expired,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Expired)
    }

    /// Status only ever moves forward; nothing returns to `Draft` and
    /// terminal states are final.
    pub fn can_transition_to(self, next: Status) -> bool {
        match (self, next) {
            (Self::Draft, Self::InProgress) => true,
            (Self::Draft, Self::Rejected) | (Self::Draft, Self::Expired) => true,
            (Self::InProgress, Self::Completed)
            | (Self::InProgress, Self::Rejected)
            | (Self::InProgress, Self::Expired) => true,
            _ => false,
        }
    }
}

impl WorkflowInstance {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// All documents covered by this instance, the primary one first.
    pub fn document_ids(&self) -> Vec<&Id> {
        let mut ids = vec![&self.document_id];
        ids.extend(
            self.group_document_ids
                .iter()
                .filter(|id| *id != &self.document_id),
        );

        ids
    }

    pub fn transition(&mut self, next: Status) -> Result<(), (Status, Status)> {
        if self.status.can_transition_to(next) {
            self.status = next;

            Ok(())
        } else {
            Err((self.status, next))
        }
    }
}

impl WorkflowStep {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}
