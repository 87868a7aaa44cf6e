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

use std::fmt::{Display, Formatter, Result as FmtResult};

use resources::{
    document::Status as DocumentStatus, party::Channel, primitives::Id, signature::Confirmation,
    workflow::Status as WorkflowStatus,
};
use thiserror::Error;

use crate::external::{BlobError, ComposeError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid Template: {0}!")]
    InvalidTemplate(String),

    #[error("Template Not Found: {0}!")]
    TemplateNotFound(Id),

    #[error("Document Not Found: {0}!")]
    DocumentNotFound(Id),

    #[error("Document Group Not Found: {0}!")]
    GroupNotFound(Id),

    #[error("Document {0} can not be dispatched in status {1:?}!")]
    InvalidDocumentStatus(Id, DocumentStatus),

    #[error("Document has no parties!")]
    NoParties,

    #[error("Party Not Found: {0}!")]
    PartyNotFound(Id),

    #[error("Insufficient parties for role '{role}': {required} required, {available} available!")]
    InsufficientParties {
        role: String,
        required: usize,
        available: usize,
    },

    #[error("Contact data missing: {}!", ContactProblems(.0))]
    ContactDataMissing(Vec<ContactProblem>),

    #[error("Workflow Not Found for document {0}!")]
    WorkflowNotFound(Id),

    #[error("Document {0} already has an active workflow!")]
    WorkflowAlreadyActive(Id),

    #[error("Signature Request Not Found: {0}!")]
    RequestNotFound(Id),

    #[error("Invalid status transition of workflow {0}: {1:?} -> {2:?}!")]
    InvalidTransition(Id, WorkflowStatus, WorkflowStatus),

    #[error("Workflow Step Not Found: {0}!")]
    StepNotFound(Id),

    #[error("Workflow Step is not ready for signature: {0}!")]
    StepNotReady(Id),

    #[error("Document has no current version: {0}!")]
    VersionMissing(Id),

    #[error("Signature Request was already closed: {0}!")]
    RequestAlreadyClosed(Id),

    #[error("Invalid Token!")]
    InvalidToken,

    #[error("Token Expired!")]
    TokenExpired,

    #[error("Missing required fields: {}!", .0.join(", "))]
    MissingRequiredField(Vec<String>),

    #[error("Invalid typed name: {0}!")]
    InvalidTypedName(String),

    #[error("Evidence not allowed for this party: {0}!")]
    EvidenceNotAllowed(String),

    #[error("Unsupported evidence format: {0}!")]
    UnsupportedEvidenceFormat(String),

    #[error("Consent is required for a signature image!")]
    ConsentRequired,

    #[error("Contact confirmation failed: {0:?}!")]
    ContactConfirmationFailed(Confirmation),

    #[error("Certificate identity does not match the registered tax ID: {0}!")]
    CertificateIdentityMismatch(String),

    #[error("Signature method does not match: {0}!")]
    MethodMismatch(String),

    #[error("Signed document is corrupt: {0}!")]
    CorruptSignedArtifact(String),

    #[error("Invalid URL: {0}!")]
    InvalidUrl(String),

    #[error("Blob Store Error: {0}")]
    Blob(BlobError),

    #[error("Composer Error: {0}")]
    Compose(ComposeError),
}

/// A party whose configured notification channel lacks contact data.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactProblem {
    pub party_id: Id,
    pub name: String,
    pub channel: Channel,
}

struct ContactProblems<'a>(&'a [ContactProblem]);

impl Display for ContactProblems<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, problem) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }

            write!(
                f,
                "{} ({}) has no {}",
                problem.name,
                problem.party_id,
                match problem.channel {
                    Channel::Email => "e-mail address",
                    Channel::Sms => "phone number",
                }
            )?;
        }

        Ok(())
    }
}

impl From<BlobError> for Error {
    fn from(v: BlobError) -> Self {
        Self::Blob(v)
    }
}

impl From<ComposeError> for Error {
    fn from(v: ComposeError) -> Self {
        Self::Compose(v)
    }
}
