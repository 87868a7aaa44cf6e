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

use chrono::Duration;
use log::info;
use resources::{
    audit_event::{Action, Agent},
    document::Status as DocumentStatus,
    primitives::Id,
    request::Status as RequestStatus,
    workflow::Status,
    SignatureRequest, WorkflowInstance, WorkflowStep,
};
use serde::{Deserialize, Serialize};

use crate::{
    service::{templates::validate_steps, Context, Error},
    state::Inner,
};

use super::{resolve_assignments, validate_contacts, Advance, InlineStep, StepSource};

/// How the steps of a new workflow are determined. A template wins over
/// inline steps; without both every party signs in its configured order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchRequest {
    pub template_id: Option<Id>,
    pub steps: Vec<InlineStep>,
}

impl Inner {
    pub fn workflow_dispatch(
        &mut self,
        ctx: &Context<'_>,
        tenant_id: &Id,
        user_id: &Id,
        document_id: &Id,
        request: &DispatchRequest,
    ) -> Result<WorkflowInstance, Error> {
        self.workflow_create(ctx, tenant_id, user_id, vec![document_id.clone()], false, request)
    }

    /// One workflow for all documents of a group. Parties and steps come from
    /// the oldest document of the group, each step gets one request per
    /// document.
    pub fn workflow_dispatch_group(
        &mut self,
        ctx: &Context<'_>,
        tenant_id: &Id,
        user_id: &Id,
        group_id: &Id,
        request: &DispatchRequest,
    ) -> Result<WorkflowInstance, Error> {
        let documents = self
            .documents
            .group_members(tenant_id, group_id)
            .into_iter()
            .map(|d| d.id.clone())
            .collect::<Vec<_>>();

        if documents.is_empty() {
            return Err(Error::GroupNotFound(group_id.clone()));
        }

        self.workflow_create(ctx, tenant_id, user_id, documents, true, request)
    }

    fn workflow_create(
        &mut self,
        ctx: &Context<'_>,
        tenant_id: &Id,
        user_id: &Id,
        documents: Vec<Id>,
        is_group_workflow: bool,
        request: &DispatchRequest,
    ) -> Result<WorkflowInstance, Error> {
        for document_id in &documents {
            self.check_dispatchable(tenant_id, document_id)?;
        }

        let primary = documents[0].clone();

        let parties = self.documents.parties_for(&primary);
        if parties.is_empty() {
            return Err(Error::NoParties);
        }

        let assignments = match (&request.template_id, request.steps.is_empty()) {
            (Some(template_id), _) => {
                let template = self.template_get(tenant_id, template_id)?;
                if !template.is_active {
                    return Err(Error::InvalidTemplate(format!(
                        "template {} is not active",
                        template.id
                    )));
                }

                validate_steps(&template.steps)?;

                resolve_assignments(&parties, StepSource::Template(template))?
            }
            (None, false) => resolve_assignments(&parties, StepSource::Inline(&request.steps))?,
            (None, true) => resolve_assignments(&parties, StepSource::PerParty)?,
        };

        validate_contacts(&parties)?;

        let channels = parties
            .iter()
            .map(|p| (p.id.clone(), p.notification_channel))
            .collect::<Vec<_>>();

        let mut instance = WorkflowInstance {
            id: Id::generate(),
            tenant_id: tenant_id.clone(),
            document_id: primary.clone(),
            group_document_ids: if is_group_workflow {
                documents.clone()
            } else {
                Vec::new()
            },
            template_id: request.template_id.clone(),
            status: Status::Draft,
            is_group_workflow,
            created_by: user_id.clone(),
            started_at: Some(ctx.now),
            completed_at: None,
        };
        instance
            .transition(Status::InProgress)
            .map_err(|(from, to)| Error::InvalidTransition(instance.id.clone(), from, to))?;

        for (i, assignment) in assignments.into_iter().enumerate() {
            let step = WorkflowStep {
                id: Id::generate(),
                instance_id: instance.id.clone(),
                party_id: assignment.party_id,
                step_index: i as u32 + 1,
                phase_index: assignment.phase_index,
                execution_type: assignment.execution_type,
                action: assignment.action,
                deadline_at: assignment
                    .deadline_hours
                    .map(|hours| ctx.now + Duration::hours(hours.into())),
                completed_at: None,
            };

            let channel = channels
                .iter()
                .find(|(id, _)| id == &step.party_id)
                .map(|(_, channel)| *channel)
                .ok_or_else(|| Error::PartyNotFound(step.party_id.clone()))?;

            for document_id in &documents {
                self.requests.insert(SignatureRequest {
                    id: Id::generate(),
                    tenant_id: tenant_id.clone(),
                    instance_id: instance.id.clone(),
                    step_id: step.id.clone(),
                    document_id: document_id.clone(),
                    party_id: step.party_id.clone(),
                    status: RequestStatus::Pending,
                    token_hash: None,
                    token_expires_at: None,
                    token_channel: channel,
                    created_at: ctx.now,
                    sent_at: None,
                    closed_at: None,
                });
            }

            self.workflows.insert_step(step);
        }

        let instance_id = instance.id.clone();
        self.workflows.insert_instance(instance);

        for document_id in &documents {
            if let Some(document) = self.documents.get_mut(document_id) {
                document.status = DocumentStatus::InProgress;
                document.updated_at = ctx.now;
            }

            let mut builder = Self::audit_event_builder();
            builder
                .tenant(tenant_id.clone())
                .document(document_id.clone())
                .action(Action::Dispatch)
                .agent(Agent::user(user_id.clone()))
                .entity(instance_id.clone())
                .text(format!("Workflow {} dispatched for signature", instance_id));
            builder.build(&mut self.audit_events, ctx.now, None);
        }

        info!(
            "Dispatched workflow {} for {} document(s)",
            instance_id,
            documents.len()
        );

        if let Advance::Notified(count) = self.workflow_advance(ctx, &instance_id)? {
            info!("Notified {} request(s) of workflow {}", count, instance_id);
        }

        self.workflows
            .instance(&instance_id)
            .cloned()
            .ok_or(Error::WorkflowNotFound(primary))
    }

    fn check_dispatchable(&self, tenant_id: &Id, document_id: &Id) -> Result<(), Error> {
        let document = self.document_get(tenant_id, document_id)?;

        if document.is_deleted() {
            return Err(Error::DocumentNotFound(document_id.clone()));
        }

        if !document.status.is_dispatchable() {
            return Err(Error::InvalidDocumentStatus(
                document_id.clone(),
                document.status,
            ));
        }

        if self.workflows.active_for_document(document_id).is_some() {
            return Err(Error::WorkflowAlreadyActive(document_id.clone()));
        }

        Ok(())
    }
}
