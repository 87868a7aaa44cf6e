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

use std::fs::read;
use std::io::Error as IoError;
use std::path::Path;

use log::warn;
use miscellaneous::digest::sha256_hex;
use openssl::{
    error::ErrorStack as OpenSslError,
    pkcs7::{Pkcs7, Pkcs7Flags},
    pkey::{PKey, Private},
    stack::Stack,
    x509::X509,
};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct SecurityResult {
    pub signed_pdf: Vec<u8>,
    pub sha256: String,
    pub timestamp: Option<Vec<u8>>,
    pub detached_signature: Option<Vec<u8>>,
    pub warnings: Vec<String>,
}

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("IO Error: {0}")]
    IoError(IoError),

    #[error("OpenSSL Error: {0}")]
    OpenSslError(OpenSslError),

    #[error("Signing Service Unavailable: {0}!")]
    Unavailable(String),
}

/// Applies a certificate based signature and/or trusted timestamp to the
/// final document. Implementations degrade to the original bytes plus a
/// warning when nothing is configured.
pub trait CertificateSigning: Send + Sync {
    fn apply_security(&self, pdf: &[u8]) -> Result<SecurityResult, SigningError>;
}

impl SecurityResult {
    pub fn unsigned(pdf: &[u8], warning: String) -> Self {
        Self {
            signed_pdf: pdf.to_vec(),
            sha256: sha256_hex(pdf),
            timestamp: None,
            detached_signature: None,
            warnings: vec![warning],
        }
    }
}

pub struct Unconfigured;

impl CertificateSigning for Unconfigured {
    fn apply_security(&self, pdf: &[u8]) -> Result<SecurityResult, SigningError> {
        Ok(SecurityResult::unsigned(
            pdf,
            "No signing certificate or timestamp authority configured".into(),
        ))
    }
}

/// Detached PKCS#7 signature over the final document with a locally
/// configured key and certificate.
pub struct CmsSigning {
    key: PKey<Private>,
    cert: X509,
}

impl CmsSigning {
    pub fn new(key: PKey<Private>, cert: X509) -> Self {
        Self { key, cert }
    }

    pub fn from_pem_files(key: &Path, cert: &Path) -> Result<Self, SigningError> {
        let cert = read(cert)?;
        let cert = X509::from_pem(&cert)?;

        let key = read(key)?;
        let key = PKey::private_key_from_pem(&key)?;

        Ok(Self::new(key, cert))
    }
}

impl CertificateSigning for CmsSigning {
    fn apply_security(&self, pdf: &[u8]) -> Result<SecurityResult, SigningError> {
        let certs = Stack::new()?;
        let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY;
        let pkcs7 = Pkcs7::sign(&self.cert, &self.key, &certs, pdf, flags)?;
        let signature = pkcs7.to_der()?;

        let warning = "No timestamp authority configured, document is not timestamped".to_owned();
        warn!("{}", warning);

        Ok(SecurityResult {
            signed_pdf: pdf.to_vec(),
            sha256: sha256_hex(pdf),
            timestamp: None,
            detached_signature: Some(signature),
            warnings: vec![warning],
        })
    }
}

impl From<IoError> for SigningError {
    fn from(err: IoError) -> Self {
        Self::IoError(err)
    }
}

impl From<OpenSslError> for SigningError {
    fn from(err: OpenSslError) -> Self {
        Self::OpenSslError(err)
    }
}
