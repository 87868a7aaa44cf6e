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

use base64::{encode_config, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use log::info;
use miscellaneous::digest::sha256_hex;
use rand::{distributions::Standard, rngs::OsRng, Rng};
use resources::{audit_event::Action, primitives::Id, SignatureRequest};

use crate::{config::Config, state::Inner};

use super::Error;

const TOKEN_BYTES: usize = 32;

/// Random URL safe bearer token with 256 bits of entropy.
pub fn generate_token() -> String {
    let bytes = OsRng
        .sample_iter(&Standard)
        .take(TOKEN_BYTES)
        .collect::<Vec<u8>>();

    encode_config(&bytes, URL_SAFE_NO_PAD)
}

pub fn hash_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

impl Inner {
    /// Issues a fresh token for the request and returns the raw value. Only
    /// its hash is kept.
    pub fn token_issue(
        &mut self,
        request_id: &Id,
        config: &Config,
        now: DateTime<Utc>,
    ) -> Result<String, Error> {
        let token = generate_token();

        self.requests
            .set_token(request_id, hash_token(&token), Some(now + config.token_ttl))
            .ok_or_else(|| Error::RequestNotFound(request_id.clone()))?;

        Ok(token)
    }

    /// Resolves a raw token to its request. A token past its expiry keeps
    /// working during the grace window, each such use moves the expiry to
    /// `now + ttl`.
    pub fn token_resolve(
        &mut self,
        token: &str,
        config: &Config,
        now: DateTime<Utc>,
    ) -> Result<SignatureRequest, Error> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::InvalidToken);
        }

        let request = self
            .requests
            .by_token_hash(&hash_token(token))
            .ok_or(Error::InvalidToken)?;

        let expires_at = match request.token_expires_at {
            Some(expires_at) if now > expires_at => expires_at,
            _ => return Ok(request.clone()),
        };

        if now > expires_at + config.token_grace {
            return Err(Error::TokenExpired);
        }

        let id = request.id.clone();
        let request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::RequestNotFound(id.clone()))?;
        request.token_expires_at = Some(now + config.token_ttl);
        let request = request.clone();

        info!(
            "Token of request {} used within grace window (expired at {})",
            request.id, expires_at
        );

        let mut builder = Self::audit_event_builder();
        builder
            .tenant(request.tenant_id.clone())
            .document(request.document_id.clone())
            .action(Action::TokenGraceUsed)
            .entity(request.id.clone())
            .text(format!(
                "Signing link used after expiry at {}, extended until {}",
                expires_at.to_rfc3339(),
                (now + config.token_ttl).to_rfc3339()
            ));
        builder.build(&mut self.audit_events, now, None);

        Ok(request)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use chrono::Duration;
    use resources::{party::Channel, request::Status};

    fn inner_with_request() -> (Inner, Id) {
        let mut inner = Inner::default();
        let id = Id::generate();

        inner.requests.insert(SignatureRequest {
            id: id.clone(),
            tenant_id: Id::generate(),
            instance_id: Id::generate(),
            step_id: Id::generate(),
            document_id: Id::generate(),
            party_id: Id::generate(),
            status: Status::Pending,
            token_hash: None,
            token_expires_at: None,
            token_channel: Channel::Email,
            created_at: Utc::now(),
            sent_at: None,
            closed_at: None,
        });

        (inner, id)
    }

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();

        assert_ne!(a, b);
        assert!(a.len() >= 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn issued_token_resolves_to_request() {
        let (mut inner, id) = inner_with_request();
        let config = Config::default();
        let now = Utc::now();

        let token = inner.token_issue(&id, &config, now).unwrap();
        let stored = inner.requests.get(&id).unwrap();
        assert_eq!(stored.token_hash.as_deref(), Some(hash_token(&token).as_str()));
        assert_ne!(stored.token_hash.as_deref(), Some(token.as_str()));

        let request = inner.token_resolve(&token, &config, now).unwrap();
        assert_eq!(request.id, id);

        let mut mutated = token.clone();
        mutated.push('x');
        assert!(matches!(
            inner.token_resolve(&mutated, &config, now),
            Err(Error::InvalidToken)
        ));
    }

    #[test]
    fn reissue_invalidates_previous_token() {
        let (mut inner, id) = inner_with_request();
        let config = Config::default();
        let now = Utc::now();

        let first = inner.token_issue(&id, &config, now).unwrap();
        let second = inner.token_issue(&id, &config, now).unwrap();

        assert!(matches!(
            inner.token_resolve(&first, &config, now),
            Err(Error::InvalidToken)
        ));
        assert!(inner.token_resolve(&second, &config, now).is_ok());
    }

    #[test]
    fn grace_window_slides_expiry() {
        let (mut inner, id) = inner_with_request();
        let config = Config::default();
        let issued = Utc::now();

        let token = inner.token_issue(&id, &config, issued).unwrap();
        let later = issued + config.token_ttl + Duration::days(3);

        let request = inner.token_resolve(&token, &config, later).unwrap();
        assert_eq!(request.token_expires_at, Some(later + config.token_ttl));
        assert_eq!(inner.audit_events.iter().count(), 1);

        let much_later = later + config.token_ttl + config.token_grace + Duration::seconds(1);
        assert!(matches!(
            inner.token_resolve(&token, &config, much_later),
            Err(Error::TokenExpired)
        ));
    }
}
