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

use miscellaneous::certificate::{extract_tax_id, mentions_certificate};
use resources::{
    misc::digits,
    party::SignatureMethod,
    signature::{CertificateMetadata, Confirmation},
    Party,
};

use crate::service::Error;

use super::payload::{non_blank, SignPayload};

/// Certificate evidence presented with a sign action.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CertificateEvidence {
    pub used: bool,
    pub metadata: Option<CertificateMetadata>,
}

impl CertificateEvidence {
    pub fn from_payload(payload: &SignPayload) -> Self {
        let identifying = [
            &payload.certificate_subject,
            &payload.certificate_issuer,
            &payload.certificate_serial,
            &payload.certificate_thumbprint,
        ]
        .iter()
        .any(|v| non_blank(v).is_some());

        let declared = [&payload.signature_type, &payload.signature_authentication]
            .iter()
            .filter_map(|v| non_blank(v))
            .any(mentions_certificate);

        let used = identifying || declared || non_blank(&payload.signed_pdf).is_some();
        if !used {
            return Self::default();
        }

        let texts = [
            &payload.certificate_subject,
            &payload.certificate_issuer,
            &payload.certificate_serial,
            &payload.certificate_thumbprint,
            &payload.signature_protocol,
            &payload.signature_type,
            &payload.signature_authentication,
        ];
        let extracted_tax_id = extract_tax_id(texts.iter().filter_map(|v| non_blank(v)));

        let metadata = CertificateMetadata {
            subject: non_blank(&payload.certificate_subject).map(Into::into),
            issuer: non_blank(&payload.certificate_issuer).map(Into::into),
            serial: non_blank(&payload.certificate_serial).map(Into::into),
            thumbprint: non_blank(&payload.certificate_thumbprint).map(Into::into),
            protocol: non_blank(&payload.signature_protocol).map(Into::into),
            signature_type: non_blank(&payload.signature_type).map(Into::into),
            authentication: non_blank(&payload.signature_authentication).map(Into::into),
            extracted_tax_id,
            tax_id_confirmed_by_signer: false,
        };

        Self {
            used: true,
            metadata: Some(metadata),
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.metadata.as_ref()?.serial.as_deref()
    }
}

/// Contact confirmation of signers acting through a signing link.
pub fn confirm_contact(party: &Party, payload: &SignPayload) -> Result<Vec<Confirmation>, Error> {
    let mut ret = Vec::new();

    if party.require_email_confirmation {
        let registered = party
            .email
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let submitted = non_blank(&payload.confirm_email);

        match (registered, submitted) {
            (Some(registered), Some(submitted)) if registered.eq_ignore_ascii_case(submitted) => {
                ret.push(Confirmation::Email)
            }
            _ => return Err(Error::ContactConfirmationFailed(Confirmation::Email)),
        }
    }

    if party.require_phone_confirmation {
        let registered = party.phone.as_deref().map(digits).unwrap_or_default();
        let submitted = payload
            .confirm_phone_last4
            .as_deref()
            .map(digits)
            .unwrap_or_default();

        if registered.len() < 4 || submitted.len() != 4 || !registered.ends_with(&submitted) {
            return Err(Error::ContactConfirmationFailed(Confirmation::PhoneLast4));
        }

        ret.push(Confirmation::PhoneLast4);
    }

    Ok(ret)
}

/// Binds the certificate evidence to the configured signature method of the
/// party. Digital signatures need a certificate of the registered tax ID,
/// electronic ones must not present a certificate.
pub fn bind_method(
    party: &Party,
    evidence: &mut CertificateEvidence,
    confirm_tax_id: Option<&str>,
) -> Result<Vec<Confirmation>, Error> {
    match party.signature_method {
        SignatureMethod::Electronic => {
            if evidence.used {
                return Err(Error::MethodMismatch(
                    "certificate evidence given for an electronic signature".into(),
                ));
            }

            Ok(Vec::new())
        }
        SignatureMethod::Digital => {
            let metadata = match (evidence.used, evidence.metadata.as_mut()) {
                (true, Some(metadata)) => metadata,
                _ => {
                    return Err(Error::MethodMismatch(
                        "digital signature requires certificate evidence".into(),
                    ))
                }
            };

            let registered = party.tax_id.as_ref().ok_or_else(|| {
                Error::CertificateIdentityMismatch("party has no registered tax ID".into())
            })?;

            if let Some(extracted) = &metadata.extracted_tax_id {
                if !registered.matches(extracted) {
                    return Err(Error::CertificateIdentityMismatch(
                        "certificate tax ID differs from the registered one".into(),
                    ));
                }

                return Ok(Vec::new());
            }

            match confirm_tax_id {
                Some(confirmed) if registered.matches(confirmed) => {
                    metadata.tax_id_confirmed_by_signer = true;

                    Ok(vec![Confirmation::TaxId])
                }
                Some(_) => Err(Error::CertificateIdentityMismatch(
                    "confirmed tax ID differs from the registered one".into(),
                )),
                None => Err(Error::CertificateIdentityMismatch(
                    "no tax ID found in certificate, confirmation required".into(),
                )),
            }
        }
    }
}
