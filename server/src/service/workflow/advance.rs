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

use std::collections::BTreeMap;

use log::{error, info, warn};
use resources::{
    audit_event::{Action, Outcome},
    document::Status as DocumentStatus,
    primitives::Id,
    request::Status as RequestStatus,
    workflow::Status,
};

use crate::{
    external::{Outgoing, SignatureRequestNotice},
    service::{Context, Error, Finalization},
    state::Inner,
};

use super::{is_complete, next_steps_to_notify};

/// What a call to `workflow_advance` did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Advance {
    Idle,
    Notified(usize),
    Completed,
}

impl Inner {
    /// Moves the workflow forward: completes it once every step is done,
    /// otherwise sends the pending requests of the next eligible phase.
    /// Calling it again without changes does nothing.
    pub fn workflow_advance(&mut self, ctx: &Context<'_>, instance_id: &Id) -> Result<Advance, Error> {
        let instance = self
            .workflows
            .instance(instance_id)
            .ok_or_else(|| Error::WorkflowNotFound(instance_id.clone()))?;

        if !instance.is_active() {
            return Ok(Advance::Idle);
        }

        let steps = self.workflows.steps_for(instance_id);
        let complete = is_complete(&steps);
        let next = next_steps_to_notify(&steps)
            .into_iter()
            .map(|step| step.id.clone())
            .collect::<Vec<_>>();

        if complete {
            self.workflow_complete(ctx, instance_id)?;

            return Ok(Advance::Completed);
        }

        let mut count = 0;
        for step_id in next {
            let pending = self
                .requests
                .for_step(&step_id)
                .into_iter()
                .filter(|r| r.status == RequestStatus::Pending)
                .map(|r| r.id.clone())
                .collect::<Vec<_>>();

            for request_id in pending {
                self.request_send(ctx, &request_id)?;
                count += 1;
            }
        }

        if count > 0 {
            Ok(Advance::Notified(count))
        } else {
            Ok(Advance::Idle)
        }
    }

    /// Re-sends the open requests of the current phase for one document.
    pub fn workflow_resend(
        &mut self,
        ctx: &Context<'_>,
        tenant_id: &Id,
        document_id: &Id,
    ) -> Result<usize, Error> {
        self.document_get(tenant_id, document_id)?;

        let instance_id = self
            .workflows
            .latest_for_document(document_id)
            .map(|instance| instance.id.clone())
            .ok_or_else(|| Error::WorkflowNotFound(document_id.clone()))?;

        self.resend(ctx, &instance_id, Some(document_id))
    }

    /// Re-sends the open requests of the current phase for every document
    /// of a group.
    pub fn workflow_resend_group(
        &mut self,
        ctx: &Context<'_>,
        tenant_id: &Id,
        group_id: &Id,
    ) -> Result<usize, Error> {
        let primary = self
            .documents
            .group_members(tenant_id, group_id)
            .first()
            .map(|document| document.id.clone())
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;

        let instance_id = self
            .workflows
            .latest_for_document(&primary)
            .map(|instance| instance.id.clone())
            .ok_or(Error::WorkflowNotFound(primary))?;

        self.resend(ctx, &instance_id, None)
    }

    fn resend(
        &mut self,
        ctx: &Context<'_>,
        instance_id: &Id,
        document_id: Option<&Id>,
    ) -> Result<usize, Error> {
        let instance = self
            .workflows
            .instance(instance_id)
            .ok_or_else(|| Error::WorkflowNotFound(instance_id.clone()))?;

        if !instance.is_active() {
            info!("Workflow {} is not active, nothing to resend", instance_id);

            return Ok(0);
        }

        let tenant_id = instance.tenant_id.clone();
        let steps = self.workflows.steps_for(instance_id);
        let open = next_steps_to_notify(&steps)
            .into_iter()
            .flat_map(|step| self.requests.for_step(&step.id))
            .filter(|r| r.is_open())
            .filter(|r| document_id.map_or(true, |id| &r.document_id == id))
            .map(|r| (r.id.clone(), r.document_id.clone()))
            .collect::<Vec<_>>();

        let mut per_document: BTreeMap<Id, usize> = BTreeMap::new();
        for (request_id, document_id) in open {
            self.request_send(ctx, &request_id)?;

            *per_document.entry(document_id).or_default() += 1;
        }

        for (document_id, count) in &per_document {
            let mut builder = Self::audit_event_builder();
            builder
                .tenant(tenant_id.clone())
                .document(document_id.clone())
                .action(Action::Resend)
                .entity(instance_id.clone())
                .text(format!("{} signature request(s) sent again", count));
            builder.build(&mut self.audit_events, ctx.now, None);
        }

        Ok(per_document.values().sum())
    }

    /// Issues a new token for the request, marks it as sent and queues the
    /// signing link for delivery.
    fn request_send(&mut self, ctx: &Context<'_>, request_id: &Id) -> Result<(), Error> {
        let token = self.token_issue(request_id, ctx.config, ctx.now)?;
        let link = ctx
            .config
            .signing_link(&token)
            .map_err(|err| Error::InvalidUrl(err.to_string()))?;

        let request = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| Error::RequestNotFound(request_id.clone()))?;
        request.status = RequestStatus::Sent;
        request.sent_at = Some(ctx.now);
        let request = request.clone();

        let step = self
            .workflows
            .step(&request.step_id)
            .cloned()
            .ok_or_else(|| Error::StepNotFound(request.step_id.clone()))?;
        let party = self
            .documents
            .party(&request.party_id)
            .cloned()
            .ok_or_else(|| Error::PartyNotFound(request.party_id.clone()))?;
        let document = self
            .documents
            .get(&request.document_id)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(request.document_id.clone()))?;

        self.outbox
            .push(Outgoing::SignatureRequest(SignatureRequestNotice {
                request,
                party,
                document,
                step,
                token,
                link,
            }));

        Ok(())
    }

    fn workflow_complete(&mut self, ctx: &Context<'_>, instance_id: &Id) -> Result<(), Error> {
        let instance = self
            .workflows
            .instance_mut(instance_id)
            .ok_or_else(|| Error::WorkflowNotFound(instance_id.clone()))?;
        instance
            .transition(Status::Completed)
            .map_err(|(from, to)| Error::InvalidTransition(instance_id.clone(), from, to))?;
        instance.completed_at = Some(ctx.now);
        let instance = instance.clone();

        for document_id in instance.document_ids() {
            if let Some(document) = self.documents.get_mut(document_id) {
                document.status = DocumentStatus::Completed;
                document.updated_at = ctx.now;
            }

            let mut builder = Self::audit_event_builder();
            builder
                .tenant(instance.tenant_id.clone())
                .document(document_id.clone())
                .action(Action::Complete)
                .entity(instance.id.clone())
                .text("All workflow steps completed");
            builder.build(&mut self.audit_events, ctx.now, None);
        }

        self.workflow_expire_open_requests(ctx, &instance.id, &instance.tenant_id);

        if let Some(document) = self.documents.get(&instance.document_id).cloned() {
            self.notification_push(
                &document.created_by,
                &document.id,
                "Workflow completed".into(),
                format!("All parties have signed \"{}\".", document.name),
                ctx.now,
            );
        }

        info!("Workflow {} completed", instance.id);

        for document_id in instance.document_ids() {
            match self.finalize_document(ctx, document_id) {
                Ok(Finalization::Finalized { warnings, .. }) => {
                    for warning in warnings {
                        warn!("Document {}: {}", document_id, warning);
                    }
                }
                Ok(Finalization::Skipped) => (),
                Err(err) => {
                    error!("Finalization of document {} failed: {}", document_id, err);

                    let mut builder = Self::audit_event_builder();
                    builder
                        .tenant(instance.tenant_id.clone())
                        .document(document_id.clone())
                        .action(Action::FinalizeFailed)
                        .error_outcome(Outcome::SeriousFailure)
                        .text("Final document could not be created, finalization can be retried");
                    builder.build(&mut self.audit_events, ctx.now, Some(err.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Closes requests that are still open once the workflow completed.
    /// These are the requests on secondary documents of a group, as only
    /// the primary document decides when a step is done.
    fn workflow_expire_open_requests(
        &mut self,
        ctx: &Context<'_>,
        instance_id: &Id,
        tenant_id: &Id,
    ) {
        let open = self
            .requests
            .for_instance(instance_id)
            .into_iter()
            .filter(|r| r.is_open())
            .map(|r| r.id.clone())
            .collect::<Vec<_>>();

        let mut per_document: BTreeMap<Id, usize> = BTreeMap::new();
        for request_id in open {
            if let Some(request) = self.requests.get_mut(&request_id) {
                request.status = RequestStatus::Expired;
                request.closed_at = Some(ctx.now);

                *per_document.entry(request.document_id.clone()).or_default() += 1;
            }
        }

        for (document_id, count) in per_document {
            let mut builder = Self::audit_event_builder();
            builder
                .tenant(tenant_id.clone())
                .document(document_id)
                .action(Action::Expire)
                .entity(instance_id.clone())
                .text(format!(
                    "{} open signature request(s) closed as the workflow completed",
                    count
                ));
            builder.build(&mut self.audit_events, ctx.now, None);
        }
    }
}
