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

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use resources::{primitives::Id, SignatureRequest};

/// Signature requests, indexed by the hash of their current token.
#[derive(Clone, Default)]
pub struct Requests {
    by_id: HashMap<Id, SignatureRequest>,
    by_token: HashMap<String, Id>,
}

impl Requests {
    pub fn insert(&mut self, request: SignatureRequest) {
        let id = request.id.clone();

        if let Some(old) = self.by_id.get(&id).and_then(|r| r.token_hash.clone()) {
            self.by_token.remove(&old);
        }

        if let Some(hash) = &request.token_hash {
            self.by_token.insert(hash.clone(), id.clone());
        }

        self.by_id.insert(id, request);
    }

    pub fn get(&self, id: &Id) -> Option<&SignatureRequest> {
        self.by_id.get(id)
    }

    /// Mutable access for status changes. Token changes go through
    /// `set_token` to keep the index intact.
    pub fn get_mut(&mut self, id: &Id) -> Option<&mut SignatureRequest> {
        self.by_id.get_mut(id)
    }

    pub fn by_token_hash(&self, hash: &str) -> Option<&SignatureRequest> {
        let id = self.by_token.get(hash)?;

        self.by_id.get(id)
    }

    /// Replaces the token of a request. The previous token stops resolving.
    pub fn set_token(
        &mut self,
        id: &Id,
        hash: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Option<()> {
        let request = self.by_id.get_mut(id)?;

        if let Some(old) = request.token_hash.take() {
            self.by_token.remove(&old);
        }

        request.token_hash = Some(hash.clone());
        request.token_expires_at = expires_at;
        self.by_token.insert(hash, id.clone());

        Some(())
    }

    pub fn for_instance(&self, instance_id: &Id) -> Vec<&SignatureRequest> {
        let mut ret = self
            .by_id
            .values()
            .filter(|r| &r.instance_id == instance_id)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        ret
    }

    pub fn for_step(&self, step_id: &Id) -> Vec<&SignatureRequest> {
        let mut ret = self
            .by_id
            .values()
            .filter(|r| &r.step_id == step_id)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        ret
    }

    pub fn for_document(&self, document_id: &Id) -> Vec<&SignatureRequest> {
        let mut ret = self
            .by_id
            .values()
            .filter(|r| &r.document_id == document_id)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        ret
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignatureRequest> {
        self.by_id.values()
    }
}
