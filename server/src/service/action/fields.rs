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

use resources::{
    document::FieldType,
    primitives::Id,
    template::normalize_role,
    Field, Party,
};

use crate::{config::Config, service::Error};

use super::{
    evidence::{decode_image, normalize_typed_name, DecodedImage},
    payload::{non_blank, FieldInput},
};

/// Fields of the current document version that belong to the role of a
/// party.
pub struct FieldRules {
    fields: Vec<Field>,
}

/// Evidence captured for one field, not yet stored.
#[derive(Clone, Debug)]
pub struct CapturedField {
    pub field_id: Id,
    pub typed_name: Option<String>,
    pub image: Option<DecodedImage>,
    pub image_name: Option<String>,
}

impl FieldRules {
    pub fn resolve(fields: Vec<Field>, party: &Party) -> Self {
        let role = normalize_role(&party.role);

        let fields = fields
            .into_iter()
            .filter(|f| normalize_role(&f.role) == role)
            .collect();

        Self { fields }
    }

    pub fn field(&self, id: &Id) -> Option<&Field> {
        self.fields.iter().find(|f| &f.id == id)
    }

    /// Display names of required fields that received no value. Typed name
    /// and image fields fall back to the top level evidence.
    pub fn missing(
        &self,
        party: &Party,
        captured: &[CapturedField],
        has_typed_name: bool,
        has_image: bool,
    ) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| is_required(f, party))
            .filter(|f| {
                let capture = captured.iter().find(|c| c.field_id == f.id);

                let satisfied = match f.field_type {
                    FieldType::TypedName => {
                        has_typed_name || capture.map_or(false, |c| c.typed_name.is_some())
                    }
                    FieldType::SignatureImage => {
                        has_image || capture.map_or(false, |c| c.image.is_some())
                    }
                    FieldType::Text => capture.map_or(false, |c| c.typed_name.is_some()),
                    FieldType::Date => true,
                };

                !satisfied
            })
            .map(Field::display_name)
            .collect()
    }
}

/// A field can only be required if the party may provide its modality.
/// Date fields are filled in automatically.
fn is_required(field: &Field, party: &Party) -> bool {
    field.required
        && match field.field_type {
            FieldType::TypedName => party.allow_typed_name,
            FieldType::SignatureImage => party.allow_signature_image,
            FieldType::Text => true,
            FieldType::Date => false,
        }
}

/// Validates the evidence given for one field.
pub fn capture_field(
    field: &Field,
    input: &FieldInput,
    party: &Party,
    consent_given: bool,
    config: &Config,
) -> Result<Option<CapturedField>, Error> {
    let mut typed_name = None;
    let mut image = None;

    match field.field_type {
        FieldType::TypedName => {
            if let Some(raw) = input.typed_name.as_deref() {
                typed_name = normalize_typed_name(raw, config)?;
            }

            if typed_name.is_some() && !party.allow_typed_name {
                return Err(Error::EvidenceNotAllowed(format!(
                    "typed name for field {}",
                    field.display_name()
                )));
            }
        }
        FieldType::Text => {
            typed_name = non_blank(&input.typed_name)
                .map(|v| v.chars().take(config.typed_name_max_len).collect());
        }
        FieldType::SignatureImage => {
            if let Some(raw) = non_blank(&input.image) {
                if !party.allow_signature_image {
                    return Err(Error::EvidenceNotAllowed(format!(
                        "signature image for field {}",
                        field.display_name()
                    )));
                }

                if !consent_given {
                    return Err(Error::ConsentRequired);
                }

                image = Some(decode_image(
                    raw,
                    input.image_mime.as_deref(),
                    config.max_image_size,
                )?);
            }
        }
        FieldType::Date => (),
    }

    if typed_name.is_none() && image.is_none() {
        return Ok(None);
    }

    Ok(Some(CapturedField {
        field_id: field.id.clone(),
        typed_name,
        image,
        image_name: non_blank(&input.image_name).map(Into::into),
    }))
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use resources::party::{Channel, SignatureMethod};

    fn party(role: &str) -> Party {
        Party {
            id: Id::generate(),
            document_id: Id::generate(),
            name: "Maria Silva".into(),
            email: Some("maria@example.com".into()),
            phone: None,
            role: role.into(),
            company: None,
            tax_id: None,
            order_index: 1,
            notification_channel: Channel::Email,
            signature_method: SignatureMethod::Electronic,
            allow_typed_name: true,
            allow_signature_image: false,
            require_email_confirmation: false,
            require_phone_confirmation: false,
        }
    }

    fn field(role: &str, field_type: FieldType, label: &str) -> Field {
        Field {
            id: Id::generate(),
            document_id: Id::generate(),
            version_id: Id::generate(),
            role: role.into(),
            field_type,
            label: Some(label.into()),
            required: true,
            page: 1,
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 20.0,
        }
    }

    #[test]
    fn only_allowed_modalities_are_required() {
        let party = party("Buyer");
        let fields = vec![
            field("buyer", FieldType::TypedName, "Name"),
            field("buyer", FieldType::SignatureImage, "Image"),
            field("buyer", FieldType::Date, "Date"),
            field("seller", FieldType::TypedName, "Seller name"),
        ];

        let rules = FieldRules::resolve(fields, &party);

        assert_eq!(rules.missing(&party, &[], false, false), vec!["Name"]);
        assert!(rules.missing(&party, &[], true, false).is_empty());
    }

    #[test]
    fn field_level_value_satisfies_requirement() {
        let party = party("buyer");
        let name = field("buyer", FieldType::TypedName, "Name");
        let text = field("buyer", FieldType::Text, "City");
        let rules = FieldRules::resolve(vec![name.clone(), text.clone()], &party);

        let config = Config::default();
        let input = FieldInput {
            field_id: name.id.clone(),
            typed_name: Some("Maria Silva".into()),
            image: None,
            image_mime: None,
            image_name: None,
        };
        let captured = capture_field(&name, &input, &party, false, &config)
            .unwrap()
            .unwrap();

        assert_eq!(
            rules.missing(&party, &[captured], false, false),
            vec!["City"]
        );
    }

    #[test]
    fn image_field_needs_permission() {
        let party = party("buyer");
        let image = field("buyer", FieldType::SignatureImage, "Image");
        let input = FieldInput {
            field_id: image.id.clone(),
            typed_name: None,
            image: Some("iVBORw0KGgo=".into()),
            image_mime: None,
            image_name: None,
        };

        assert!(matches!(
            capture_field(&image, &input, &party, true, &Config::default()),
            Err(Error::EvidenceNotAllowed(_))
        ));
    }
}
