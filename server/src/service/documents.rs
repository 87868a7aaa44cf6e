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

use resources::{primitives::Id, Document, DocumentVersion, Field, Party};

use crate::state::Inner;

use super::Error;

/// Read model of the surrounding document domain. The engine only writes
/// document status and the current version pointer.
#[derive(Clone, Default)]
pub struct Documents {
    by_id: HashMap<Id, Document>,
    versions: HashMap<Id, DocumentVersion>,
    fields: HashMap<Id, Field>,
    parties: HashMap<Id, Party>,
}

impl Documents {
    pub fn insert(&mut self, document: Document) {
        self.by_id.insert(document.id.clone(), document);
    }

    pub fn insert_version(&mut self, version: DocumentVersion) {
        self.versions.insert(version.id.clone(), version);
    }

    pub fn insert_field(&mut self, field: Field) {
        self.fields.insert(field.id.clone(), field);
    }

    pub fn insert_party(&mut self, party: Party) {
        self.parties.insert(party.id.clone(), party);
    }

    pub fn get(&self, id: &Id) -> Option<&Document> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &Id) -> Option<&mut Document> {
        self.by_id.get_mut(id)
    }

    pub fn version(&self, id: &Id) -> Option<&DocumentVersion> {
        self.versions.get(id)
    }

    pub fn current_version(&self, document_id: &Id) -> Option<&DocumentVersion> {
        let document = self.by_id.get(document_id)?;
        let version_id = document.current_version_id.as_ref()?;

        self.versions.get(version_id)
    }

    pub fn party(&self, id: &Id) -> Option<&Party> {
        self.parties.get(id)
    }

    /// Parties of a document in their configured order.
    pub fn parties_for(&self, document_id: &Id) -> Vec<&Party> {
        let mut parties = self
            .parties
            .values()
            .filter(|p| &p.document_id == document_id)
            .collect::<Vec<_>>();
        parties.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));

        parties
    }

    pub fn fields_for_version(&self, version_id: &Id) -> Vec<&Field> {
        let mut fields = self
            .fields
            .values()
            .filter(|f| &f.version_id == version_id)
            .collect::<Vec<_>>();
        fields.sort_by(|a, b| {
            a.page
                .cmp(&b.page)
                .then(a.y.total_cmp(&b.y))
                .then(a.id.cmp(&b.id))
        });

        fields
    }

    /// Documents of a group that are not deleted, oldest first.
    pub fn group_members(&self, tenant_id: &Id, group_id: &Id) -> Vec<&Document> {
        let mut documents = self
            .by_id
            .values()
            .filter(|d| {
                &d.tenant_id == tenant_id && d.group_id.as_ref() == Some(group_id) && !d.is_deleted()
            })
            .collect::<Vec<_>>();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        documents
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.by_id.values()
    }

    pub fn versions(&self) -> impl Iterator<Item = &DocumentVersion> {
        self.versions.values()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.parties.values()
    }
}

impl Inner {
    /// Looks up a document of the given tenant. Documents of other tenants
    /// are reported as missing.
    pub fn document_get(&self, tenant_id: &Id, id: &Id) -> Result<&Document, Error> {
        match self.documents.get(id) {
            Some(document) if &document.tenant_id == tenant_id => Ok(document),
            _ => Err(Error::DocumentNotFound(id.clone())),
        }
    }
}
