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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    party::SignatureMethod,
    primitives::Id,
    template::StepAction,
};

/// Append-only evidence record for a signature request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub id: Id,
    pub request_id: Id,
    pub document_id: Id,
    pub party_id: Id,
    pub outcome: Outcome,
    pub signature_type: SignatureType,
    pub signed_at: DateTime<Utc>,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub reason: Option<String>,
    pub typed_name: Option<String>,
    pub typed_name_hash: Option<String>,
    pub field_values: BTreeMap<Id, FieldValue>,
    pub evidence: EvidenceOptions,
    pub consent: Option<Consent>,
    pub image: Option<ImageEvidence>,
    pub certificate_serial: Option<String>,
    pub digest_sha256: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Signed,
    Refused,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    Electronic,
    Digital,
    Token,
}

/// Which evidence modalities were used for a signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceOptions {
    pub action: StepAction,
    pub method: SignatureMethod,
    pub typed_name: bool,
    pub signature_image: bool,
    pub signed_pdf: bool,
    pub via_token: bool,
    pub confirmations: Vec<Confirmation>,
    pub field_signature_ids: Vec<Id>,
    pub certificate: Option<CertificateMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub serial: Option<String>,
    pub thumbprint: Option<String>,
    pub protocol: Option<String>,
    pub signature_type: Option<String>,
    pub authentication: Option<String>,
    pub extracted_tax_id: Option<String>,
    pub tax_id_confirmed_by_signer: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Confirmation {
    Email,
    PhoneLast4,
    TaxId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub text: Option<String>,
    pub version: Option<String>,
    pub given_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageEvidence {
    pub artifact_id: Id,
    pub storage_path: String,
    pub sha256: String,
    pub mime: String,
    pub size: usize,
    pub filename: String,
}

/// Evidence captured for one document field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_id: Id,
    pub typed_name: Option<String>,
    pub typed_name_hash: Option<String>,
    pub image: Option<ImageEvidence>,
}

impl Signature {
    pub fn is_signed(&self) -> bool {
        self.outcome == Outcome::Signed
    }

    /// Short human readable description of how the signature was given.
    pub fn describe_method(&self) -> String {
        let mut parts = Vec::new();

        match self.signature_type {
            SignatureType::Digital => parts.push("digital certificate"),
            SignatureType::Electronic => parts.push("electronic signature"),
            SignatureType::Token => parts.push("signing link"),
        }

        if self.evidence.typed_name {
            parts.push("typed name");
        }
        if self.evidence.signature_image {
            parts.push("signature image");
        }
        if self.evidence.signed_pdf {
            parts.push("signed PDF");
        }

        parts.join(", ")
    }
}
