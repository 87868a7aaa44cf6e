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

use resources::primitives::Id;
use serde::{Deserialize, Serialize};

/// Action of a signer on a signature request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SignatureAction {
    Sign(SignPayload),
    Refuse {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignPayload {
    pub typed_name: Option<String>,

    pub signature_image: Option<String>,
    pub signature_image_mime: Option<String>,
    pub signature_image_name: Option<String>,

    pub consent_given: bool,
    pub consent_text: Option<String>,
    pub consent_version: Option<String>,

    pub confirm_email: Option<String>,
    pub confirm_phone_last4: Option<String>,
    pub confirm_tax_id: Option<String>,

    pub certificate_subject: Option<String>,
    pub certificate_issuer: Option<String>,
    pub certificate_serial: Option<String>,
    pub certificate_thumbprint: Option<String>,
    pub signature_protocol: Option<String>,
    pub signature_type: Option<String>,
    pub signature_authentication: Option<String>,

    pub signed_pdf: Option<String>,
    pub signed_pdf_name: Option<String>,
    pub signed_pdf_mime: Option<String>,
    pub signed_pdf_digest: Option<String>,

    pub field_values: Vec<FieldInput>,
}

/// Evidence for one document field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInput {
    pub field_id: Id,

    #[serde(default)]
    pub typed_name: Option<String>,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub image_mime: Option<String>,

    #[serde(default)]
    pub image_name: Option<String>,
}

/// Network details of the signer, recorded with the evidence.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Trimmed value, `None` if blank.
pub(super) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
