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

use resources::{primitives::Id, Signature};

/// Append-only store of signature evidence.
#[derive(Clone, Default)]
pub struct Signatures {
    by_id: HashMap<Id, Signature>,
    by_request: HashMap<Id, Vec<Id>>,
}

impl Signatures {
    pub fn insert(&mut self, signature: Signature) {
        let id = signature.id.clone();
        let request_id = signature.request_id.clone();

        if self.by_id.contains_key(&id) {
            return;
        }

        self.by_id.insert(id.clone(), signature);
        self.by_request.entry(request_id).or_default().push(id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.by_id.values()
    }

    pub fn for_request(&self, request_id: &Id) -> Vec<&Signature> {
        match self.by_request.get(request_id) {
            Some(ids) => ids.iter().filter_map(|id| self.by_id.get(id)).collect(),
            None => Vec::new(),
        }
    }

    /// The most recent signature recorded for the request.
    pub fn latest_for_request(&self, request_id: &Id) -> Option<&Signature> {
        self.for_request(request_id)
            .into_iter()
            .max_by(|a, b| a.signed_at.cmp(&b.signed_at))
    }
}
