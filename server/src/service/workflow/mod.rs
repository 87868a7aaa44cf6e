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

mod advance;
mod assignment;
mod dispatch;
mod sequencing;

pub use advance::Advance;
pub use assignment::{
    resolve_assignments, validate_contacts, Assignment, InlineStep, StepSource,
};
pub use dispatch::DispatchRequest;
pub use sequencing::{is_complete, next_steps_to_notify, phases};

use std::collections::HashMap;

use resources::{primitives::Id, SignatureRequest, WorkflowInstance, WorkflowStep};

use crate::state::Inner;

use super::Error;

#[derive(Clone, Default)]
pub struct Workflows {
    instances: HashMap<Id, WorkflowInstance>,
    steps: HashMap<Id, WorkflowStep>,
    by_document: HashMap<Id, Vec<Id>>,
}

/// Snapshot of the workflow of a document.
#[derive(Clone, Debug)]
pub struct WorkflowStatus {
    pub instance: WorkflowInstance,
    pub steps: Vec<WorkflowStep>,
    pub requests: Vec<SignatureRequest>,
}

impl Workflows {
    pub fn insert_instance(&mut self, instance: WorkflowInstance) {
        let id = instance.id.clone();

        if !self.instances.contains_key(&id) {
            for document_id in instance.document_ids() {
                self.by_document
                    .entry(document_id.clone())
                    .or_default()
                    .push(id.clone());
            }
        }

        self.instances.insert(id, instance);
    }

    pub fn insert_step(&mut self, step: WorkflowStep) {
        self.steps.insert(step.id.clone(), step);
    }

    pub fn instance(&self, id: &Id) -> Option<&WorkflowInstance> {
        self.instances.get(id)
    }

    pub fn instance_mut(&mut self, id: &Id) -> Option<&mut WorkflowInstance> {
        self.instances.get_mut(id)
    }

    pub fn step(&self, id: &Id) -> Option<&WorkflowStep> {
        self.steps.get(id)
    }

    pub fn step_mut(&mut self, id: &Id) -> Option<&mut WorkflowStep> {
        self.steps.get_mut(id)
    }

    /// Steps of an instance ordered by their step index.
    pub fn steps_for(&self, instance_id: &Id) -> Vec<&WorkflowStep> {
        let mut ret = self
            .steps
            .values()
            .filter(|s| &s.instance_id == instance_id)
            .collect::<Vec<_>>();
        ret.sort_by_key(|s| s.step_index);

        ret
    }

    /// The most recently dispatched instance covering the document.
    pub fn latest_for_document(&self, document_id: &Id) -> Option<&WorkflowInstance> {
        self.by_document
            .get(document_id)?
            .iter()
            .rev()
            .find_map(|id| self.instances.get(id))
    }

    pub fn active_for_document(&self, document_id: &Id) -> Option<&WorkflowInstance> {
        self.latest_for_document(document_id)
            .filter(|instance| instance.is_active())
    }

    pub fn instances(&self) -> impl Iterator<Item = &WorkflowInstance> {
        self.instances.values()
    }

    pub fn steps(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.steps.values()
    }
}

impl Inner {
    pub fn workflow_status(&self, tenant_id: &Id, document_id: &Id) -> Result<WorkflowStatus, Error> {
        self.document_get(tenant_id, document_id)?;

        let instance = self
            .workflows
            .latest_for_document(document_id)
            .ok_or_else(|| Error::WorkflowNotFound(document_id.clone()))?;

        let steps = self
            .workflows
            .steps_for(&instance.id)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        let mut requests = self
            .requests
            .for_instance(&instance.id)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let position = |r: &SignatureRequest| {
            steps
                .iter()
                .find(|s| s.id == r.step_id)
                .map(|s| s.step_index)
                .unwrap_or_default()
        };
        requests.sort_by_key(|r| (position(r), r.document_id != instance.document_id));

        Ok(WorkflowStatus {
            instance: instance.clone(),
            steps,
            requests,
        })
    }
}
