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

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_trait::async_trait;
use log::info;
use resources::{primitives::Id, Document, Party, SignatureRequest, WorkflowStep};
use url::Url;

/// Everything needed to deliver a signing link to one party.
#[derive(Clone)]
pub struct SignatureRequestNotice {
    pub request: SignatureRequest,
    pub party: Party,
    pub document: Document,
    pub step: WorkflowStep,
    pub token: String,
    pub link: Url,
}

#[derive(Clone, Debug)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub storage_path: String,
    pub sha256: String,
}

#[derive(Clone, Debug)]
pub struct CompletionNotice {
    pub document: Document,
    pub parties: Vec<Party>,
    pub attachments: Vec<Attachment>,
    pub extra_recipients: Vec<Id>,
}

/// Outbound message queued during an operation and delivered after commit.
#[derive(Clone, Debug)]
pub enum Outgoing {
    SignatureRequest(SignatureRequestNotice),
    WorkflowCompleted(CompletionNotice),
}

/// Delivery of outbound messages. Implementations report failures through
/// the returned flag and never fail the calling operation.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify_signature_request(&self, notice: &SignatureRequestNotice) -> bool;

    async fn notify_workflow_completed(&self, notice: &CompletionNotice) -> bool;
}

/// Writes every message to the log instead of sending it.
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn notify_signature_request(&self, notice: &SignatureRequestNotice) -> bool {
        info!(
            "Signature request for {} ({}) via {}: {}",
            notice.party.name,
            notice.document.name,
            notice.request.token_channel.as_str(),
            notice.link
        );

        true
    }

    async fn notify_workflow_completed(&self, notice: &CompletionNotice) -> bool {
        info!(
            "Document {} completed: notifying {} parties and {} users, {} attachments",
            notice.document.id,
            notice.parties.len(),
            notice.extra_recipients.len(),
            notice.attachments.len()
        );

        true
    }
}

impl Outgoing {
    pub fn document_id(&self) -> &Id {
        match self {
            Self::SignatureRequest(notice) => &notice.document.id,
            Self::WorkflowCompleted(notice) => &notice.document.id,
        }
    }

    pub fn tenant_id(&self) -> &Id {
        match self {
            Self::SignatureRequest(notice) => &notice.document.tenant_id,
            Self::WorkflowCompleted(notice) => &notice.document.tenant_id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::SignatureRequest(notice) => format!(
                "Signature request {} to {} via {}",
                notice.request.id,
                notice.party.name,
                notice.request.token_channel.as_str()
            ),
            Self::WorkflowCompleted(notice) => {
                format!("Completion notice for document {}", notice.document.id)
            }
        }
    }
}

impl Debug for SignatureRequestNotice {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SignatureRequestNotice")
            .field("request", &self.request.id)
            .field("party", &self.party.id)
            .field("document", &self.document.id)
            .field("step", &self.step.id)
            .field("token", &"<redacted>")
            .finish()
    }
}
