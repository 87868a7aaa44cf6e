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
use resources::{
    audit_event::{Action, Agent, AuditEvent, Outcome},
    primitives::Id,
};

use crate::state::Inner;

#[derive(Clone, Default)]
pub struct AuditEvents {
    by_id: HashMap<Id, AuditEvent>,
    by_document: HashMap<Id, Vec<Id>>,
}

impl AuditEvents {
    pub fn insert(&mut self, audit_event: AuditEvent) {
        let id = audit_event.id.clone();
        let document_id = audit_event.document_id.clone();

        if self.by_id.insert(id.clone(), audit_event).is_none() {
            self.by_document.entry(document_id).or_default().push(id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditEvent> {
        self.by_id.values()
    }

    /// All events of a document in the order they were recorded.
    pub fn for_document(&self, document_id: &Id) -> Vec<&AuditEvent> {
        let mut events: Vec<&AuditEvent> = match self.by_document.get(document_id) {
            Some(ids) => ids.iter().filter_map(|id| self.by_id.get(id)).collect(),
            None => Vec::new(),
        };
        events.sort_by(|a, b| a.recorded.cmp(&b.recorded));

        events
    }

    /// The `count` most recent events of a document, oldest first.
    pub fn recent_for_document(&self, document_id: &Id, count: usize) -> Vec<&AuditEvent> {
        let mut events = self.for_document(document_id);
        let skip = events.len().saturating_sub(count);

        events.drain(..skip);

        events
    }
}

impl Inner {
    pub fn audit_event_builder() -> Builder {
        Builder::new()
    }
}

pub struct Builder {
    error_outcome: Option<Outcome>,
    tenant_id: Option<Id>,
    document_id: Option<Id>,
    action: Option<Action>,
    agent: Option<Agent>,
    entity: Option<Id>,
    text: Option<String>,
}

impl Builder {
    fn new() -> Self {
        Self {
            error_outcome: None,
            tenant_id: None,
            document_id: None,
            action: None,
            agent: None,
            entity: None,
            text: None,
        }
    }

    /// Stores the event. Returns `None` if a mandatory part was not set.
    pub fn build(
        self,
        audit_events: &mut AuditEvents,
        now: DateTime<Utc>,
        error: Option<String>,
    ) -> Option<()> {
        let tenant_id = self.tenant_id?;
        let document_id = self.document_id?;
        let action = self.action?;
        let (outcome, outcome_description) = if let Some(error) = error {
            (
                self.error_outcome.unwrap_or(Outcome::MinorFailure),
                Some(error),
            )
        } else {
            (Outcome::Success, None)
        };
        let agent = self.agent.unwrap_or_else(Agent::system);

        audit_events.insert(AuditEvent {
            id: Id::generate(),
            tenant_id,
            document_id,
            text: self.text,
            action,
            recorded: now,
            outcome,
            outcome_description,
            agent,
            entity: self.entity,
        });

        Some(())
    }

    pub fn error_outcome(&mut self, value: Outcome) -> &mut Self {
        self.error_outcome = Some(value);

        self
    }

    pub fn tenant(&mut self, value: Id) -> &mut Self {
        self.tenant_id = Some(value);

        self
    }

    pub fn document(&mut self, value: Id) -> &mut Self {
        self.document_id = Some(value);

        self
    }

    pub fn action(&mut self, value: Action) -> &mut Self {
        self.action = Some(value);

        self
    }

    pub fn agent(&mut self, value: Agent) -> &mut Self {
        self.agent = Some(value);

        self
    }

    pub fn entity(&mut self, value: Id) -> &mut Self {
        self.entity = Some(value);

        self
    }

    pub fn text<T>(&mut self, value: T) -> &mut Self
    where
        T: Into<String>,
    {
        self.text = Some(value.into());

        self
    }
}
