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

use chrono::Duration;
use url::{ParseError, Url};

lazy_static! {
    static ref DEFAULT_BASE_URL: Url = Url::parse("http://localhost:3000/").unwrap();
}

/// Runtime settings of the signature workflow engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Lifetime of a freshly issued (or grace-extended) signing token.
    pub token_ttl: Duration,

    /// Time after the nominal token expiry during which a link keeps working.
    pub token_grace: Duration,

    pub max_image_size: usize,
    pub typed_name_min_len: usize,
    pub typed_name_max_len: usize,

    /// Number of audit events listed in the signature protocol.
    pub protocol_audit_events: usize,
    pub protocol_lines_per_page: usize,

    /// Signing links are `<public_base_url>/sign/<token>`.
    pub public_base_url: Url,

    /// Root below which all blobs of this engine are stored.
    pub blob_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_ttl: Duration::hours(24),
            token_grace: Duration::days(30),
            max_image_size: 2 * 1024 * 1024,
            typed_name_min_len: 3,
            typed_name_max_len: 255,
            protocol_audit_events: 20,
            protocol_lines_per_page: 40,
            public_base_url: DEFAULT_BASE_URL.clone(),
            blob_root: "documents".into(),
        }
    }
}

impl Config {
    pub fn signing_link(&self, token: &str) -> Result<Url, ParseError> {
        self.public_base_url.join(&format!("sign/{}", token))
    }

    pub fn document_root(&self, tenant_id: &str, document_id: &str) -> String {
        format!("{}/{}/{}", self.blob_root, tenant_id, document_id)
    }
}
