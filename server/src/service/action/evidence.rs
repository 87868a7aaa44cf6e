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

use base64::{decode, decode_config, URL_SAFE};
use miscellaneous::digest::sha256_hex;

use crate::{config::Config, service::Error};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PDF_MAGIC: &[u8] = b"%PDF";

/// Decoded signature image.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pub data: Vec<u8>,
    pub mime: &'static str,
    pub extension: &'static str,
}

/// Trims and caps a typed name. Blank input yields `None`.
pub fn normalize_typed_name(raw: &str, config: &Config) -> Result<Option<String>, Error> {
    let name = raw.trim();
    if name.is_empty() {
        return Ok(None);
    }

    let name = name
        .chars()
        .take(config.typed_name_max_len)
        .collect::<String>();
    let name = name.trim_end().to_owned();

    if name.chars().count() < config.typed_name_min_len {
        return Err(Error::InvalidTypedName(format!(
            "at least {} characters required",
            config.typed_name_min_len
        )));
    }

    Ok(Some(name))
}

pub fn hash_typed_name(name: &str) -> String {
    sha256_hex(name.as_bytes())
}

/// Decodes a base64 or data URL image. Only PNG and JPEG up to the
/// configured size are accepted. The sniffed type wins over the declared one.
pub fn decode_image(
    raw: &str,
    declared_mime: Option<&str>,
    max_size: usize,
) -> Result<DecodedImage, Error> {
    let (url_mime, payload) = split_data_url(raw);

    let data = decode_base64(payload)
        .map_err(|_| Error::UnsupportedEvidenceFormat("image is not valid base64".into()))?;

    if data.is_empty() {
        return Err(Error::UnsupportedEvidenceFormat("image is empty".into()));
    }

    if data.len() > max_size {
        return Err(Error::UnsupportedEvidenceFormat(format!(
            "image exceeds {} bytes",
            max_size
        )));
    }

    let mime = match sniff_image(&data) {
        Some(mime) => mime,
        None => {
            let declared = url_mime.or(declared_mime).unwrap_or_default();
            let declared = declared.trim().to_ascii_lowercase();

            match declared.as_str() {
                "image/png" => "image/png",
                "image/jpeg" | "image/jpg" => "image/jpeg",
                _ => {
                    return Err(Error::UnsupportedEvidenceFormat(
                        "image must be PNG or JPEG".into(),
                    ))
                }
            }
        }
    };

    let extension = if mime == "image/png" { "png" } else { "jpg" };

    Ok(DecodedImage {
        data,
        mime,
        extension,
    })
}

/// Decodes a signed PDF sent by the signer. Anything that is not a PDF is
/// considered corrupt.
pub fn decode_pdf(raw: &str) -> Result<Vec<u8>, Error> {
    let (_, payload) = split_data_url(raw);

    let data = decode_base64(payload)
        .map_err(|_| Error::CorruptSignedArtifact("signed PDF is not valid base64".into()))?;

    if !data.starts_with(PDF_MAGIC) {
        return Err(Error::CorruptSignedArtifact(
            "signed document is not a PDF".into(),
        ));
    }

    Ok(data)
}

fn sniff_image(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else if data.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else {
        None
    }
}

/// Splits `data:<mime>;base64,<payload>` into mime and payload.
fn split_data_url(raw: &str) -> (Option<&str>, &str) {
    let raw = raw.trim();

    match raw.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());

            (mime, payload)
        }
        None => (None, raw),
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();

    decode(&payload).or_else(|_| decode_config(&payload, URL_SAFE))
}
