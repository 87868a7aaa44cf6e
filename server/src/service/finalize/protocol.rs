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
use resources::{
    document::FieldType,
    primitives::Id,
    template::normalize_role,
    AuditEvent, Document, DocumentVersion, Field, Party, Signature, SignatureRequest,
};

use crate::external::{FieldStamp, ProtocolPage, StampContent};

const LINE_WIDTH: usize = 96;

/// Everything shown in the signature protocol of a document.
pub struct ProtocolInput<'a> {
    pub document: &'a Document,
    pub version: &'a DocumentVersion,
    pub parties: &'a [&'a Party],
    pub requests: &'a [&'a SignatureRequest],
    pub signatures: &'a [&'a Signature],
    pub audit_events: &'a [&'a AuditEvent],
    pub warnings: &'a [String],
    pub generated_at: DateTime<Utc>,
}

pub fn protocol_lines(input: &ProtocolInput<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut push = |line: String| lines.extend(wrap(&line));

    let document = input.document;
    let version = input.version;

    push("SIGNATURE PROTOCOL".into());
    push(String::new());
    push(format!("Document: {}", document.name));
    push(format!("Document ID: {}", document.id));
    push(format!("Original file: {} (version {})", version.filename, version.number));
    push(format!("Original SHA-256: {}", version.sha256));
    push(format!("Generated at: {}", timestamp(&input.generated_at)));

    push(String::new());
    push("PARTIES".into());
    for party in input.parties {
        let signature = latest_signature(input.signatures, &party.id);

        push(format!("{}. {} ({})", party.order_index, party.name, party.role));
        if let Some(company) = party.company.as_deref().filter(|c| !c.trim().is_empty()) {
            push(format!("   Company: {}", company));
        }
        if let Some(tax_id) = &party.tax_id {
            push(format!("   Tax ID: {}", tax_id));
        }

        match signature {
            Some(signature) if signature.is_signed() => {
                push(format!("   Status: signed at {}", timestamp(&signature.signed_at)));
                push(format!("   Method: {}", signature.describe_method()));
                if let Some(hash) = &signature.typed_name_hash {
                    push(format!("   Typed name SHA-256: {}", hash));
                }
                if let Some(serial) = &signature.certificate_serial {
                    push(format!("   Certificate serial: {}", serial));
                }
                if let Some(ip) = &signature.signer_ip {
                    push(format!("   IP address: {}", ip));
                }
            }
            Some(signature) => {
                push(format!("   Status: refused at {}", timestamp(&signature.signed_at)));
                if let Some(reason) = &signature.reason {
                    push(format!("   Reason: {}", reason));
                }
            }
            None => push("   Status: not signed".into()),
        }
    }

    push(String::new());
    push("SIGNATURE REQUESTS".into());
    for request in input.requests {
        let name = input
            .parties
            .iter()
            .find(|p| p.id == request.party_id)
            .map(|p| p.name.as_str())
            .unwrap_or("unknown party");

        push(format!(
            "{} - {} - {:?} via {} - sent {} - closed {}",
            request.id,
            name,
            request.status,
            request.token_channel.as_str(),
            optional_timestamp(&request.sent_at),
            optional_timestamp(&request.closed_at),
        ));
    }

    push(String::new());
    push("RECENT EVENTS".into());
    for event in input.audit_events {
        push(format!(
            "{} {:?} by {}{}",
            timestamp(&event.recorded),
            event.action,
            event.agent.name,
            event
                .text
                .as_deref()
                .map(|t| format!(": {}", t))
                .unwrap_or_default()
        ));
    }

    if !input.warnings.is_empty() {
        push(String::new());
        push("WARNINGS".into());
        for warning in input.warnings {
            push(format!("- {}", warning));
        }
    }

    lines
}

pub fn paginate(lines: Vec<String>, lines_per_page: usize) -> Vec<ProtocolPage> {
    let chunks = lines
        .chunks(lines_per_page.max(1))
        .map(<[String]>::to_vec)
        .collect::<Vec<_>>();
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, lines)| ProtocolPage {
            number: i + 1,
            total,
            lines,
        })
        .collect()
}

/// Plain text rendering of the protocol, stored as the final report.
pub fn render(pages: &[ProtocolPage]) -> String {
    let mut ret = String::new();

    for page in pages {
        ret.push_str(&format!("--- Page {} / {} ---\n", page.number, page.total));
        for line in &page.lines {
            ret.push_str(line);
            ret.push('\n');
        }
    }

    ret
}

/// Values to draw onto the fields of the document. Field level evidence
/// wins over the top level typed name or image of the signer.
pub fn field_stamps(
    fields: &[&Field],
    parties: &[&Party],
    signatures: &[&Signature],
) -> Vec<FieldStamp> {
    fields
        .iter()
        .filter_map(|field| {
            let content = stamp_content(field, parties, signatures)?;

            Some(FieldStamp {
                field_id: field.id.clone(),
                page: field.page,
                x: field.x,
                y: field.y,
                width: field.width,
                height: field.height,
                content,
            })
        })
        .collect()
}

fn stamp_content(
    field: &Field,
    parties: &[&Party],
    signatures: &[&Signature],
) -> Option<StampContent> {
    let signed = signatures.iter().filter(|s| s.is_signed());

    for signature in signed.clone() {
        if let Some(value) = signature.field_values.get(&field.id) {
            if let Some(image) = &value.image {
                return Some(StampContent::Image {
                    storage_path: image.storage_path.clone(),
                    mime: image.mime.clone(),
                });
            }

            if let Some(name) = &value.typed_name {
                return Some(StampContent::Text(name.clone()));
            }
        }
    }

    let role = normalize_role(&field.role);
    let signature = parties
        .iter()
        .filter(|p| normalize_role(&p.role) == role)
        .find_map(|p| signed.clone().find(|s| s.party_id == p.id))?;

    match field.field_type {
        FieldType::TypedName => signature.typed_name.clone().map(StampContent::Text),
        FieldType::SignatureImage => signature.image.as_ref().map(|image| StampContent::Image {
            storage_path: image.storage_path.clone(),
            mime: image.mime.clone(),
        }),
        FieldType::Date => Some(StampContent::Text(
            signature.signed_at.format("%d/%m/%Y").to_string(),
        )),
        FieldType::Text => None,
    }
}

fn latest_signature<'a>(signatures: &[&'a Signature], party_id: &Id) -> Option<&'a Signature> {
    signatures
        .iter()
        .filter(|s| &s.party_id == party_id)
        .max_by(|a, b| a.signed_at.cmp(&b.signed_at))
        .copied()
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.format("%d/%m/%Y %H:%M:%S UTC").to_string()
}

fn optional_timestamp(value: &Option<DateTime<Utc>>) -> String {
    value.as_ref().map(timestamp).unwrap_or_else(|| "-".into())
}

fn wrap(line: &str) -> Vec<String> {
    if line.chars().count() <= LINE_WIDTH {
        return vec![line.to_owned()];
    }

    let chars = line.chars().collect::<Vec<_>>();

    chars
        .chunks(LINE_WIDTH)
        .enumerate()
        .map(|(i, chunk)| {
            let part = chunk.iter().collect::<String>();

            if i == 0 {
                part
            } else {
                format!("   {}", part)
            }
        })
        .collect()
}
