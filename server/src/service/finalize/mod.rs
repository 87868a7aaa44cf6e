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

mod protocol;

pub use protocol::{field_stamps, paginate, protocol_lines, render, ProtocolInput};

use log::{info, warn};
use miscellaneous::digest::sha256_hex;
use resources::{
    artifact::{ArtifactType, AuditArtifact},
    audit_event::Action,
    document::{Status as DocumentStatus, VersionKind},
    primitives::Id,
    Document, DocumentVersion, Party,
};

use crate::{
    external::{Attachment, CompletionNotice, FieldStamp, Outgoing, ProtocolPage, SecurityResult},
    state::Inner,
};

use super::{Context, Error};

/// Result of a finalization run.
#[derive(Clone, Debug, PartialEq)]
pub enum Finalization {
    /// The current version already is the final one.
    Skipped,
    Finalized { version_id: Id, warnings: Vec<String> },
}

struct StoredBlob {
    path: String,
    sha256: String,
    size: usize,
}

impl Inner {
    /// Creates the final version of a completed document: draws the field
    /// evidence, appends the signature protocol, applies the certificate
    /// signature to the result if possible, stores it and announces it. Running it
    /// on a document that already has a final version does nothing.
    pub fn finalize_document(
        &mut self,
        ctx: &Context<'_>,
        document_id: &Id,
    ) -> Result<Finalization, Error> {
        let config = ctx.config;

        let document = self
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(document_id.clone()))?;
        let version = self
            .documents
            .current_version(document_id)
            .cloned()
            .ok_or_else(|| Error::VersionMissing(document_id.clone()))?;

        if version.kind == VersionKind::Final {
            info!("Document {} is already finalized", document_id);

            return Ok(Finalization::Skipped);
        }

        let original = ctx.blob_store.load_bytes(&version.storage_path)?;

        let parties = self.finalize_parties(document_id);
        let (pages, stamps) = self.finalize_protocol(ctx, &document, &version, &parties, &[]);
        let composite = ctx
            .composer
            .compose(&original, &pages, &stamps, ctx.blob_store)?;

        let security = match ctx.signing.apply_security(&composite) {
            Ok(security) => security,
            Err(err) => {
                warn!("Unable to sign final version of document {}: {}", document_id, err);

                SecurityResult::unsigned(&composite, format!("Certificate signing failed: {}", err))
            }
        };
        let warnings = security.warnings.clone();

        let (report_pages, _) =
            self.finalize_protocol(ctx, &document, &version, &parties, &warnings);
        let report = render(&report_pages);

        let root = config.document_root(&document.tenant_id, &document.id);
        let sha256 = sha256_hex(&security.signed_pdf);

        let pdf = store(ctx, &root, &format!("final-{}.pdf", sha256), &security.signed_pdf)?;
        let report = store(ctx, &root, &format!("report-{}.txt", sha256), report.as_bytes())?;
        let timestamp = match &security.timestamp {
            Some(data) => Some(store(ctx, &root, &format!("timestamp-{}.tsr", sha256), data)?),
            None => None,
        };
        let detached = match &security.detached_signature {
            Some(data) => Some(store(ctx, &root, &format!("signature-{}.p7s", sha256), data)?),
            None => None,
        };

        /* every blob is stored, record the result */

        let final_version = DocumentVersion {
            id: Id::generate(),
            document_id: document.id.clone(),
            number: version.number + 1,
            kind: VersionKind::Final,
            filename: format!("final-{}", version.filename),
            storage_path: pdf.path.clone(),
            sha256: pdf.sha256.clone(),
            size: pdf.size,
            created_at: ctx.now,
        };
        let version_id = final_version.id.clone();
        let filename = final_version.filename.clone();
        self.documents.insert_version(final_version);

        let document = {
            let document = self
                .documents
                .get_mut(document_id)
                .ok_or_else(|| Error::DocumentNotFound(document_id.clone()))?;
            document.current_version_id = Some(version_id.clone());
            document.status = DocumentStatus::Completed;
            document.updated_at = ctx.now;

            document.clone()
        };

        let artifact = |type_: ArtifactType, blob: &StoredBlob, mime: &str| AuditArtifact {
            id: Id::generate(),
            tenant_id: document.tenant_id.clone(),
            document_id: document.id.clone(),
            artifact_type: type_,
            storage_path: blob.path.clone(),
            sha256: blob.sha256.clone(),
            size: blob.size,
            mime: mime.to_owned(),
            created_at: ctx.now,
        };

        self.artifacts
            .insert(artifact(ArtifactType::FinalReport, &report, "text/plain"));
        if let Some(blob) = &timestamp {
            self.artifacts.insert(artifact(
                ArtifactType::TimestampToken,
                blob,
                "application/timestamp-reply",
            ));
        }
        if let Some(blob) = &detached {
            self.artifacts.insert(artifact(
                ArtifactType::DetachedSignature,
                blob,
                "application/pkcs7-signature",
            ));
        }

        let mut builder = Self::audit_event_builder();
        builder
            .tenant(document.tenant_id.clone())
            .document(document.id.clone())
            .action(Action::Finalize)
            .entity(version_id.clone())
            .text(format!(
                "Final document {} created (SHA-256 {}, {} protocol page(s)), {}, {} warning(s)",
                filename,
                pdf.sha256,
                pages.len(),
                match &detached {
                    Some(_) => "detached signature covers the final document",
                    None => "no detached signature",
                },
                warnings.len()
            ));
        builder.build(&mut self.audit_events, ctx.now, None);

        self.outbox
            .push(Outgoing::WorkflowCompleted(CompletionNotice {
                extra_recipients: vec![document.created_by.clone()],
                document,
                parties,
                attachments: vec![
                    Attachment {
                        name: filename,
                        mime: "application/pdf".into(),
                        storage_path: pdf.path,
                        sha256: pdf.sha256,
                    },
                    Attachment {
                        name: "signature-protocol.txt".into(),
                        mime: "text/plain".into(),
                        storage_path: report.path,
                        sha256: report.sha256,
                    },
                ],
            }));

        info!("Document {} finalized as version {}", document_id, version_id);

        Ok(Finalization::Finalized {
            version_id,
            warnings,
        })
    }

    /// Protocol pages and field stamps for the document. The stamps only
    /// depend on the captured evidence, not on the warnings.
    fn finalize_protocol(
        &self,
        ctx: &Context<'_>,
        document: &Document,
        version: &DocumentVersion,
        parties: &[Party],
        warnings: &[String],
    ) -> (Vec<ProtocolPage>, Vec<FieldStamp>) {
        let config = ctx.config;
        let party_refs = parties.iter().collect::<Vec<_>>();
        let requests = self.requests.for_document(&document.id);
        let signatures = requests
            .iter()
            .flat_map(|r| self.signatures.for_request(&r.id))
            .collect::<Vec<_>>();
        let audit_events = self
            .audit_events
            .recent_for_document(&document.id, config.protocol_audit_events);
        let fields = self.documents.fields_for_version(&version.id);

        let lines = protocol_lines(&ProtocolInput {
            document,
            version,
            parties: &party_refs,
            requests: &requests,
            signatures: &signatures,
            audit_events: &audit_events,
            warnings,
            generated_at: ctx.now,
        });

        let pages = paginate(lines, config.protocol_lines_per_page);
        let stamps = field_stamps(&fields, &party_refs, &signatures);

        (pages, stamps)
    }

    /// Parties of the document plus those bound to it through requests, as
    /// documents of a group share the parties of the primary document.
    fn finalize_parties(&self, document_id: &Id) -> Vec<Party> {
        let mut parties = self
            .documents
            .parties_for(document_id)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        for request in self.requests.for_document(document_id) {
            if parties.iter().any(|p| p.id == request.party_id) {
                continue;
            }

            if let Some(party) = self.documents.party(&request.party_id) {
                parties.push(party.clone());
            }
        }

        parties.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));

        parties
    }
}

fn store(ctx: &Context<'_>, root: &str, name: &str, data: &[u8]) -> Result<StoredBlob, Error> {
    let path = ctx.blob_store.save_bytes(root, name, data)?;

    Ok(StoredBlob {
        path,
        sha256: sha256_hex(data),
        size: data.len(),
    })
}
