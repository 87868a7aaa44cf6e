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

mod action;
mod artifacts;
mod audit_events;
mod documents;
mod error;
mod finalize;
mod notifications;
mod requests;
mod signatures;
mod templates;
mod tokens;
mod workflow;

#[cfg(test)]
pub mod tests;

pub use action::{ActionOutcome, ClientInfo, FieldInput, SignPayload, SignatureAction};
pub use artifacts::Artifacts;
pub use audit_events::AuditEvents;
pub use documents::Documents;
pub use error::{ContactProblem, Error};
pub use finalize::Finalization;
pub use notifications::Notifications;
pub use requests::Requests;
pub use signatures::Signatures;
pub use templates::{validate_steps, TemplateFilter, TemplatePatch, Templates};
pub use tokens::{generate_token, hash_token};
pub use workflow::{
    next_steps_to_notify, Advance, DispatchRequest, InlineStep, WorkflowStatus, Workflows,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{info, warn};
use resources::{
    audit_event::{Action, Agent, Outcome},
    primitives::Id,
    template::{normalize_role, StepConfig},
    workflow::Status,
    Document, Field, InAppNotification, Party, SignatureRequest, WorkflowInstance,
    WorkflowTemplate,
};

use crate::{
    config::Config,
    external::{BlobStore, CertificateSigning, DocumentComposer, NotificationGateway, Outgoing},
    state::{Inner, State},
};

/// Collaborators and clock of one operation.
pub struct Context<'a> {
    pub config: &'a Config,
    pub blob_store: &'a dyn BlobStore,
    pub signing: &'a dyn CertificateSigning,
    pub composer: &'a dyn DocumentComposer,
    pub now: DateTime<Utc>,
}

/// What an unauthenticated signer sees after opening a signing link.
#[derive(Clone, Debug)]
pub struct SigningView {
    pub request: SignatureRequest,
    pub document: Document,
    pub party: Party,
    pub fields: Vec<Field>,
}

/// Entry point of the signature workflow engine. Every operation runs as
/// one unit of work on the shared state; messages it produces are delivered
/// after the commit.
#[derive(Clone)]
pub struct Service {
    state: State,
    config: Arc<Config>,
    blob_store: Arc<dyn BlobStore>,
    signing: Arc<dyn CertificateSigning>,
    composer: Arc<dyn DocumentComposer>,
    gateway: Arc<dyn NotificationGateway>,
}

impl Service {
    pub fn new(
        state: State,
        config: Config,
        blob_store: Arc<dyn BlobStore>,
        signing: Arc<dyn CertificateSigning>,
        composer: Arc<dyn DocumentComposer>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            state,
            config: Arc::new(config),
            blob_store,
            signing,
            composer,
            gateway,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /* templates */

    pub async fn template_create(
        &self,
        tenant_id: Id,
        area_id: Id,
        name: String,
        description: Option<String>,
        steps: Vec<StepConfig>,
    ) -> Result<WorkflowTemplate, Error> {
        self.execute(|inner, ctx| {
            inner.template_create(tenant_id, area_id, name, description, steps, ctx.now)
        })
        .await
    }

    pub async fn template_update(
        &self,
        tenant_id: &Id,
        template_id: &Id,
        patch: TemplatePatch,
    ) -> Result<WorkflowTemplate, Error> {
        self.execute(|inner, ctx| inner.template_update(tenant_id, template_id, patch, ctx.now))
            .await
    }

    pub async fn template_duplicate(
        &self,
        tenant_id: &Id,
        template_id: &Id,
        new_name: String,
        target_area: Option<Id>,
    ) -> Result<WorkflowTemplate, Error> {
        self.execute(|inner, ctx| {
            inner.template_duplicate(tenant_id, template_id, new_name, target_area, ctx.now)
        })
        .await
    }

    pub async fn template_get(
        &self,
        tenant_id: &Id,
        template_id: &Id,
    ) -> Result<WorkflowTemplate, Error> {
        let inner = self.state.lock().await;

        inner.template_get(tenant_id, template_id).map(Clone::clone)
    }

    pub async fn template_list(
        &self,
        tenant_id: &Id,
        filter: &TemplateFilter,
    ) -> Vec<WorkflowTemplate> {
        let inner = self.state.lock().await;

        inner
            .template_list(tenant_id, filter)
            .into_iter()
            .cloned()
            .collect()
    }

    /* workflow */

    pub async fn dispatch(
        &self,
        tenant_id: &Id,
        user_id: &Id,
        document_id: &Id,
        request: &DispatchRequest,
    ) -> Result<WorkflowInstance, Error> {
        let ret = self
            .execute(|inner, ctx| {
                inner.workflow_dispatch(ctx, tenant_id, user_id, document_id, request)
            })
            .await;

        if let Err(err) = &ret {
            let agent = Agent::user(user_id.clone());

            self.record_failure(tenant_id, document_id, Action::Dispatch, agent, err)
                .await;
        }

        ret
    }

    pub async fn dispatch_group(
        &self,
        tenant_id: &Id,
        user_id: &Id,
        group_id: &Id,
        request: &DispatchRequest,
    ) -> Result<WorkflowInstance, Error> {
        self.execute(|inner, ctx| {
            inner.workflow_dispatch_group(ctx, tenant_id, user_id, group_id, request)
        })
        .await
    }

    pub async fn resend_pending(&self, tenant_id: &Id, document_id: &Id) -> Result<usize, Error> {
        self.execute(|inner, ctx| inner.workflow_resend(ctx, tenant_id, document_id))
            .await
    }

    pub async fn resend_group(&self, tenant_id: &Id, group_id: &Id) -> Result<usize, Error> {
        self.execute(|inner, ctx| inner.workflow_resend_group(ctx, tenant_id, group_id))
            .await
    }

    pub async fn workflow_status(
        &self,
        tenant_id: &Id,
        document_id: &Id,
    ) -> Result<WorkflowStatus, Error> {
        let inner = self.state.lock().await;

        inner.workflow_status(tenant_id, document_id)
    }

    /* public signing */

    /// Resolves a signing link. Links within the grace window are extended.
    pub async fn resolve_token(&self, token: &str) -> Result<SigningView, Error> {
        self.execute(|inner, ctx| {
            let request = inner.token_resolve(token, ctx.config, ctx.now)?;

            let document = inner
                .documents
                .get(&request.document_id)
                .cloned()
                .ok_or_else(|| Error::DocumentNotFound(request.document_id.clone()))?;
            let party = inner
                .documents
                .party(&request.party_id)
                .cloned()
                .ok_or_else(|| Error::PartyNotFound(request.party_id.clone()))?;
            let fields = match inner.documents.current_version(&document.id) {
                Some(version) => inner
                    .documents
                    .fields_for_version(&version.id)
                    .into_iter()
                    .filter(|f| normalize_role(&f.role) == normalize_role(&party.role))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };

            Ok(SigningView {
                request,
                document,
                party,
                fields,
            })
        })
        .await
    }

    /// Applies an action of a signer that opened a signing link.
    pub async fn apply_with_token(
        &self,
        token: &str,
        action: SignatureAction,
        client: &ClientInfo,
    ) -> Result<ActionOutcome, Error> {
        let log_action = action_kind(&action);

        let ret = self
            .execute(|inner, ctx| {
                let request = inner.token_resolve(token, ctx.config, ctx.now)?;

                inner.action_apply(ctx, &request.id, action, client, true)
            })
            .await;

        if let Err(err) = &ret {
            if !matches!(err, Error::InvalidToken | Error::TokenExpired) {
                let request = self
                    .state
                    .lock()
                    .await
                    .requests
                    .by_token_hash(&hash_token(token.trim()))
                    .cloned();

                if let Some(request) = request {
                    self.record_request_failure(&request, log_action, err).await;
                }
            }
        }

        ret
    }

    /// Applies an action on behalf of an authenticated signer.
    pub async fn apply(
        &self,
        tenant_id: &Id,
        request_id: &Id,
        action: SignatureAction,
        client: &ClientInfo,
    ) -> Result<ActionOutcome, Error> {
        let log_action = action_kind(&action);

        let ret = self
            .execute(|inner, ctx| {
                match inner.requests.get(request_id) {
                    Some(request) if &request.tenant_id == tenant_id => (),
                    _ => return Err(Error::RequestNotFound(request_id.clone())),
                }

                inner.action_apply(ctx, request_id, action, client, false)
            })
            .await;

        if let Err(err) = &ret {
            let request = self.state.lock().await.requests.get(request_id).cloned();

            if let Some(request) = request.filter(|r| &r.tenant_id == tenant_id) {
                self.record_request_failure(&request, log_action, err).await;
            }
        }

        ret
    }

    /* finalization */

    /// Runs the finalization of a completed document again, e.g. after a
    /// failed first attempt.
    pub async fn finalize(&self, tenant_id: &Id, document_id: &Id) -> Result<Finalization, Error> {
        let ret = self
            .execute(|inner, ctx| {
                let document = inner.document_get(tenant_id, document_id)?;
                let completed = inner
                    .workflows
                    .latest_for_document(document_id)
                    .map_or(false, |instance| instance.status == Status::Completed);

                if !completed {
                    return Err(Error::InvalidDocumentStatus(
                        document_id.clone(),
                        document.status,
                    ));
                }

                inner.finalize_document(ctx, document_id)
            })
            .await;

        if let Err(err) = &ret {
            let agent = Agent::system();

            self.record_failure(tenant_id, document_id, Action::FinalizeFailed, agent, err)
                .await;
        }

        ret
    }

    /* in-app notifications */

    pub async fn notifications_for(&self, user_id: &Id) -> Vec<InAppNotification> {
        let inner = self.state.lock().await;

        inner
            .notifications
            .for_user(user_id)
            .into_iter()
            .cloned()
            .collect()
    }

    fn context(&self) -> Context<'_> {
        Context {
            config: &self.config,
            blob_store: self.blob_store.as_ref(),
            signing: self.signing.as_ref(),
            composer: self.composer.as_ref(),
            now: Utc::now(),
        }
    }

    async fn execute<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Inner, &Context<'_>) -> Result<T, Error>,
    {
        let ctx = self.context();
        let (ret, outbox) = self.state.transaction(|inner| f(inner, &ctx)).await?;

        self.deliver(outbox).await;

        Ok(ret)
    }

    /// Delivers all messages concurrently. A failed delivery neither stops
    /// the others nor undoes the operation that produced it.
    async fn deliver(&self, outbox: Vec<Outgoing>) {
        if outbox.is_empty() {
            return;
        }

        let gateway = self.gateway.as_ref();
        let results = join_all(outbox.iter().map(|message| async move {
            match message {
                Outgoing::SignatureRequest(notice) => {
                    gateway.notify_signature_request(notice).await
                }
                Outgoing::WorkflowCompleted(notice) => {
                    gateway.notify_workflow_completed(notice).await
                }
            }
        }))
        .await;

        let now = Utc::now();
        let ret = self
            .state
            .transaction(|inner| {
                for (message, delivered) in outbox.iter().zip(results) {
                    let description = message.describe();

                    let mut builder = Inner::audit_event_builder();
                    builder
                        .tenant(message.tenant_id().clone())
                        .document(message.document_id().clone());

                    if delivered {
                        info!("{} delivered", description);

                        builder.action(Action::NotificationSent).text(description);
                        builder.build(&mut inner.audit_events, now, None);
                    } else {
                        warn!("{} could not be delivered", description);

                        builder.action(Action::NotificationFailed).text(description);
                        builder.build(
                            &mut inner.audit_events,
                            now,
                            Some("delivery failed".into()),
                        );
                    }
                }

                Ok::<_, Error>(())
            })
            .await;

        if let Err(err) = ret {
            warn!("Unable to record notification results: {}", err);
        }
    }

    async fn record_request_failure(&self, request: &SignatureRequest, action: Action, err: &Error) {
        let agent = {
            let inner = self.state.lock().await;

            match inner.documents.party(&request.party_id) {
                Some(party) => Agent::signer(party.id.clone(), party.name.clone()),
                None => Agent::system(),
            }
        };

        self.record_failure(&request.tenant_id, &request.document_id, action, agent, err)
            .await;
    }

    /// Records a failed operation in a separate unit of work.
    async fn record_failure(
        &self,
        tenant_id: &Id,
        document_id: &Id,
        action: Action,
        agent: Agent,
        err: &Error,
    ) {
        if matches!(err, Error::DocumentNotFound(_)) {
            return;
        }

        let now = Utc::now();
        let ret = self
            .state
            .transaction(|inner| {
                let mut builder = Inner::audit_event_builder();
                builder
                    .tenant(tenant_id.clone())
                    .document(document_id.clone())
                    .action(action)
                    .agent(agent)
                    .error_outcome(match err {
                        Error::Blob(_) | Error::Compose(_) => Outcome::SeriousFailure,
                        _ => Outcome::MinorFailure,
                    });
                builder.build(&mut inner.audit_events, now, Some(err.to_string()));

                Ok::<_, Error>(())
            })
            .await;

        if let Err(err) = ret {
            warn!("Unable to record failed operation: {}", err);
        }
    }
}

fn action_kind(action: &SignatureAction) -> Action {
    match action {
        SignatureAction::Sign(_) => Action::Sign,
        SignatureAction::Refuse { .. } => Action::Refuse,
    }
}
