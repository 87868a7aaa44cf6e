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

mod evidence;
mod fields;
mod identity;
mod payload;

pub use evidence::{decode_image, decode_pdf, hash_typed_name, normalize_typed_name, DecodedImage};
pub use fields::{capture_field, CapturedField, FieldRules};
pub use identity::{bind_method, confirm_contact, CertificateEvidence};
pub use payload::{ClientInfo, FieldInput, SignPayload, SignatureAction};

use std::collections::BTreeMap;

use log::{info, warn};
use miscellaneous::digest::sha256_hex;
use resources::{
    artifact::ArtifactType,
    audit_event::{Action, Agent},
    document::Status as DocumentStatus,
    primitives::Id,
    request::Status as RequestStatus,
    signature::{
        Consent, EvidenceOptions, FieldValue, ImageEvidence, Outcome, SignatureType,
    },
    workflow::Status,
    Document, Party, Signature, SignatureRequest, WorkflowInstance, WorkflowStep,
};

use crate::state::Inner;

use super::{
    artifacts::ArtifactBlob,
    workflow::{next_steps_to_notify, Advance},
    Context, Error,
};

use payload::non_blank;

/// Result of a successful sign or refuse action.
#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub signature: Signature,
    pub advance: Advance,
}

/// Everything an action refers to, resolved before any validation.
struct Target {
    request: SignatureRequest,
    instance: WorkflowInstance,
    step: WorkflowStep,
    party: Party,
    document: Document,
}

impl Inner {
    /// Applies a sign or refuse action to an open request and advances the
    /// workflow. `via_token` marks signers acting through a signing link.
    pub fn action_apply(
        &mut self,
        ctx: &Context<'_>,
        request_id: &Id,
        action: SignatureAction,
        client: &ClientInfo,
        via_token: bool,
    ) -> Result<ActionOutcome, Error> {
        let target = self.action_target(request_id)?;

        let signature = match action {
            SignatureAction::Refuse { reason } => {
                self.action_refuse(ctx, &target, reason, client, via_token)?
            }
            SignatureAction::Sign(payload) => {
                self.action_sign(ctx, &target, &payload, client, via_token)?
            }
        };

        if let Some(request) = self.requests.get_mut(request_id) {
            request.token_expires_at = None;
        }

        let advance = self.workflow_advance(ctx, &target.instance.id)?;

        Ok(ActionOutcome { signature, advance })
    }

    fn action_target(&self, request_id: &Id) -> Result<Target, Error> {
        let request = self
            .requests
            .get(request_id)
            .ok_or_else(|| Error::RequestNotFound(request_id.clone()))?;

        if !request.is_open() {
            return Err(Error::RequestAlreadyClosed(request_id.clone()));
        }

        let instance = self
            .workflows
            .instance(&request.instance_id)
            .ok_or_else(|| Error::WorkflowNotFound(request.document_id.clone()))?;

        if !instance.is_active() {
            return Err(Error::RequestAlreadyClosed(request_id.clone()));
        }

        let step = self
            .workflows
            .step(&request.step_id)
            .ok_or_else(|| Error::StepNotFound(request.step_id.clone()))?;

        if !step.is_completed() {
            let steps = self.workflows.steps_for(&instance.id);
            let eligible = next_steps_to_notify(&steps)
                .iter()
                .any(|s| s.id == step.id);

            if !eligible {
                return Err(Error::StepNotReady(step.id.clone()));
            }
        }

        let party = self
            .documents
            .party(&request.party_id)
            .ok_or_else(|| Error::PartyNotFound(request.party_id.clone()))?;

        let document = self
            .documents
            .get(&request.document_id)
            .ok_or_else(|| Error::DocumentNotFound(request.document_id.clone()))?;

        Ok(Target {
            request: request.clone(),
            instance: instance.clone(),
            step: step.clone(),
            party: party.clone(),
            document: document.clone(),
        })
    }

    fn action_refuse(
        &mut self,
        ctx: &Context<'_>,
        target: &Target,
        reason: Option<String>,
        client: &ClientInfo,
        via_token: bool,
    ) -> Result<Signature, Error> {
        let Target {
            request,
            instance,
            step,
            party,
            document,
        } = target;

        let reason = non_blank(&reason).map(String::from);

        let signature = Signature {
            id: Id::generate(),
            request_id: request.id.clone(),
            document_id: request.document_id.clone(),
            party_id: party.id.clone(),
            outcome: Outcome::Refused,
            signature_type: if via_token {
                SignatureType::Token
            } else {
                SignatureType::Electronic
            },
            signed_at: ctx.now,
            signer_ip: client.ip.clone(),
            signer_user_agent: client.user_agent.clone(),
            reason: reason.clone(),
            typed_name: None,
            typed_name_hash: None,
            field_values: BTreeMap::new(),
            evidence: EvidenceOptions {
                action: step.action,
                method: party.signature_method,
                typed_name: false,
                signature_image: false,
                signed_pdf: false,
                via_token,
                confirmations: Vec::new(),
                field_signature_ids: Vec::new(),
                certificate: None,
            },
            consent: None,
            image: None,
            certificate_serial: None,
            digest_sha256: None,
        };
        self.signatures.insert(signature.clone());

        self.request_close(&request.id, RequestStatus::Refused, ctx)?;
        self.step_complete(&step.id, ctx)?;

        let workflow = self
            .workflows
            .instance_mut(&instance.id)
            .ok_or_else(|| Error::WorkflowNotFound(instance.document_id.clone()))?;
        workflow
            .transition(Status::Rejected)
            .map_err(|(from, to)| Error::InvalidTransition(instance.id.clone(), from, to))?;

        let text = match &reason {
            Some(reason) => format!("{} refused to sign: {}", party.name, reason),
            None => format!("{} refused to sign", party.name),
        };

        for document_id in instance.document_ids() {
            if let Some(document) = self.documents.get_mut(document_id) {
                document.status = DocumentStatus::Rejected;
                document.updated_at = ctx.now;
            }

            let mut builder = Self::audit_event_builder();
            builder
                .tenant(instance.tenant_id.clone())
                .document(document_id.clone())
                .action(Action::Refuse)
                .agent(Agent::signer(party.id.clone(), party.name.clone()))
                .entity(signature.id.clone())
                .text(text.clone());
            builder.build(&mut self.audit_events, ctx.now, None);

            let mut builder = Self::audit_event_builder();
            builder
                .tenant(instance.tenant_id.clone())
                .document(document_id.clone())
                .action(Action::Reject)
                .entity(instance.id.clone())
                .text("Workflow rejected");
            builder.build(&mut self.audit_events, ctx.now, None);
        }

        self.notification_push(
            &document.created_by,
            &document.id,
            "Signature refused".into(),
            format!("{} on \"{}\".", text, document.name),
            ctx.now,
        );

        info!("Request {} refused, workflow {} rejected", request.id, instance.id);

        Ok(signature)
    }

    fn action_sign(
        &mut self,
        ctx: &Context<'_>,
        target: &Target,
        payload: &SignPayload,
        client: &ClientInfo,
        via_token: bool,
    ) -> Result<Signature, Error> {
        let Target {
            request,
            instance,
            step,
            party,
            document,
        } = target;
        let config = ctx.config;

        let version = self
            .documents
            .current_version(&document.id)
            .ok_or_else(|| Error::VersionMissing(document.id.clone()))?;
        let fields = self
            .documents
            .fields_for_version(&version.id)
            .into_iter()
            .cloned()
            .collect();
        let rules = FieldRules::resolve(fields, party);

        let mut certificate = CertificateEvidence::from_payload(payload);

        let mut confirmations = if via_token && !certificate.used {
            confirm_contact(party, payload)?
        } else {
            Vec::new()
        };

        let typed_name = match payload.typed_name.as_deref() {
            Some(raw) => normalize_typed_name(raw, config)?,
            None => None,
        };
        if typed_name.is_some() && !party.allow_typed_name {
            return Err(Error::EvidenceNotAllowed("typed name".into()));
        }

        let mut captured = Vec::new();
        for input in &payload.field_values {
            let field = match rules.field(&input.field_id) {
                Some(field) => field,
                None => {
                    warn!(
                        "Ignoring value for field {} not assigned to party {}",
                        input.field_id, party.id
                    );

                    continue;
                }
            };

            if let Some(capture) =
                capture_field(field, input, party, payload.consent_given, config)?
            {
                captured.push(capture);
            }
        }

        let image = match non_blank(&payload.signature_image) {
            Some(raw) => {
                if !party.allow_signature_image {
                    return Err(Error::EvidenceNotAllowed("signature image".into()));
                }

                if !payload.consent_given {
                    return Err(Error::ConsentRequired);
                }

                Some(decode_image(
                    raw,
                    payload.signature_image_mime.as_deref(),
                    config.max_image_size,
                )?)
            }
            None => None,
        };

        let missing = rules.missing(party, &captured, typed_name.is_some(), image.is_some());
        if !missing.is_empty() {
            return Err(Error::MissingRequiredField(missing));
        }

        confirmations.extend(bind_method(
            party,
            &mut certificate,
            non_blank(&payload.confirm_tax_id),
        )?);

        let signed_pdf = match non_blank(&payload.signed_pdf) {
            Some(raw) => {
                let data = decode_pdf(raw)?;

                if let Some(expected) = non_blank(&payload.signed_pdf_digest) {
                    if !expected.eq_ignore_ascii_case(&sha256_hex(&data)) {
                        return Err(Error::CorruptSignedArtifact(
                            "digest of signed document does not match".into(),
                        ));
                    }
                }

                Some(data)
            }
            None => None,
        };

        /* validation passed, store the evidence */

        let root = ctx
            .config
            .document_root(&document.tenant_id, &document.id);
        let evidence_root = format!("{}/evidence", root);

        let image = match image {
            Some(image) => Some(self.store_image(
                ctx,
                document,
                &evidence_root,
                image,
                non_blank(&payload.signature_image_name),
            )?),
            None => None,
        };

        let mut field_values = BTreeMap::new();
        for capture in captured {
            let field_image = match capture.image {
                Some(image) => Some(self.store_image(
                    ctx,
                    document,
                    &evidence_root,
                    image,
                    capture.image_name.as_deref(),
                )?),
                None => None,
            };

            let typed_name_hash = capture.typed_name.as_deref().map(hash_typed_name);
            field_values.insert(
                capture.field_id.clone(),
                FieldValue {
                    field_id: capture.field_id,
                    typed_name: capture.typed_name,
                    typed_name_hash,
                    image: field_image,
                },
            );
        }

        let digest_sha256 = match signed_pdf {
            Some(data) => {
                let artifact = self.artifact_store(
                    ctx.blob_store,
                    ArtifactBlob {
                        tenant_id: &document.tenant_id,
                        document_id: &document.id,
                        artifact_type: ArtifactType::SignedPdf,
                        root: &format!("{}/signed", root),
                        extension: "pdf",
                        mime: non_blank(&payload.signed_pdf_mime).unwrap_or("application/pdf"),
                        data: &data,
                    },
                    ctx.now,
                )?;

                Some(artifact.sha256)
            }
            None => None,
        };

        let has_typed_name =
            typed_name.is_some() || field_values.values().any(|v| v.typed_name.is_some());
        let has_image = image.is_some() || field_values.values().any(|v| v.image.is_some());

        let signature_type = if certificate.used {
            SignatureType::Digital
        } else if via_token && !has_typed_name && !has_image {
            SignatureType::Token
        } else {
            SignatureType::Electronic
        };

        let consent = if payload.consent_given {
            Some(Consent {
                text: non_blank(&payload.consent_text).map(Into::into),
                version: non_blank(&payload.consent_version).map(Into::into),
                given_at: ctx.now,
            })
        } else {
            None
        };

        let signature = Signature {
            id: Id::generate(),
            request_id: request.id.clone(),
            document_id: request.document_id.clone(),
            party_id: party.id.clone(),
            outcome: Outcome::Signed,
            signature_type,
            signed_at: ctx.now,
            signer_ip: client.ip.clone(),
            signer_user_agent: client.user_agent.clone(),
            reason: None,
            typed_name_hash: typed_name.as_deref().map(hash_typed_name),
            typed_name,
            evidence: EvidenceOptions {
                action: step.action,
                method: party.signature_method,
                typed_name: has_typed_name,
                signature_image: has_image,
                signed_pdf: digest_sha256.is_some(),
                via_token,
                confirmations,
                field_signature_ids: field_values.keys().cloned().collect(),
                certificate: certificate.metadata.clone(),
            },
            field_values,
            consent,
            image,
            certificate_serial: certificate.serial().map(Into::into),
            digest_sha256,
        };
        self.signatures.insert(signature.clone());

        self.request_close(&request.id, RequestStatus::Signed, ctx)?;
        if request.document_id == instance.document_id {
            self.step_complete(&step.id, ctx)?;
        }

        let method = signature.describe_method();
        self.notification_push(
            &document.created_by,
            &document.id,
            "Document signed".into(),
            format!(
                "{} signed \"{}\" at {} ({}).",
                party.name,
                document.name,
                ctx.now.format("%d/%m/%Y %H:%M UTC"),
                method
            ),
            ctx.now,
        );

        let mut builder = Self::audit_event_builder();
        builder
            .tenant(document.tenant_id.clone())
            .document(document.id.clone())
            .action(Action::Sign)
            .agent(Agent::signer(party.id.clone(), party.name.clone()))
            .entity(signature.id.clone())
            .text(format!("{} signed using {}", party.name, method));
        builder.build(&mut self.audit_events, ctx.now, None);

        info!("Request {} signed by party {}", request.id, party.id);

        Ok(signature)
    }

    fn store_image(
        &mut self,
        ctx: &Context<'_>,
        document: &Document,
        root: &str,
        image: DecodedImage,
        filename: Option<&str>,
    ) -> Result<ImageEvidence, Error> {
        let artifact = self.artifact_store(
            ctx.blob_store,
            ArtifactBlob {
                tenant_id: &document.tenant_id,
                document_id: &document.id,
                artifact_type: ArtifactType::SignatureImage,
                root,
                extension: image.extension,
                mime: image.mime,
                data: &image.data,
            },
            ctx.now,
        )?;

        let filename = match filename {
            Some(filename) => filename.to_owned(),
            None => format!("signature.{}", image.extension),
        };

        Ok(ImageEvidence {
            artifact_id: artifact.id,
            storage_path: artifact.storage_path,
            sha256: artifact.sha256,
            mime: artifact.mime,
            size: artifact.size,
            filename,
        })
    }

    fn request_close(
        &mut self,
        request_id: &Id,
        status: RequestStatus,
        ctx: &Context<'_>,
    ) -> Result<(), Error> {
        let request = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| Error::RequestNotFound(request_id.clone()))?;

        request.status = status;
        request.closed_at = Some(ctx.now);

        Ok(())
    }

    fn step_complete(&mut self, step_id: &Id, ctx: &Context<'_>) -> Result<(), Error> {
        let step = self
            .workflows
            .step_mut(step_id)
            .ok_or_else(|| Error::StepNotFound(step_id.clone()))?;

        if step.completed_at.is_none() {
            step.completed_at = Some(ctx.now);
        }

        Ok(())
    }
}
