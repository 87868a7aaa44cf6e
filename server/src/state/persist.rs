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

use std::io::{Read, Write};

use resources::{
    AuditArtifact, AuditEvent, Document, DocumentVersion, Field, InAppNotification, Party,
    Signature, SignatureRequest, WorkflowInstance, WorkflowStep, WorkflowTemplate,
};
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};

use crate::error::Error;

use super::Inner;

impl Inner {
    pub fn load<R>(&mut self, reader: R) -> Result<(), Error>
    where
        R: Read,
    {
        let data: Data = from_reader(reader)?;

        for template in data.templates {
            self.templates.insert(template);
        }

        for document in data.documents {
            self.documents.insert(document);
        }

        for version in data.versions {
            self.documents.insert_version(version);
        }

        for field in data.fields {
            self.documents.insert_field(field);
        }

        for party in data.parties {
            self.documents.insert_party(party);
        }

        for instance in data.instances {
            self.workflows.insert_instance(instance);
        }

        for step in data.steps {
            self.workflows.insert_step(step);
        }

        for request in data.requests {
            self.requests.insert(request);
        }

        for signature in data.signatures {
            self.signatures.insert(signature);
        }

        for artifact in data.artifacts {
            self.artifacts.insert(artifact);
        }

        for audit_event in data.audit_events {
            self.audit_events.insert(audit_event);
        }

        for notification in data.notifications {
            self.notifications.insert(notification);
        }

        Ok(())
    }

    pub fn save<W>(&self, writer: W) -> Result<(), Error>
    where
        W: Write,
    {
        let mut data = Data {
            templates: self.templates.iter().cloned().collect(),
            documents: self.documents.iter().cloned().collect(),
            versions: self.documents.versions().cloned().collect(),
            fields: self.documents.fields().cloned().collect(),
            parties: self.documents.parties().cloned().collect(),
            instances: self.workflows.instances().cloned().collect(),
            steps: self.workflows.steps().cloned().collect(),
            requests: self.requests.iter().cloned().collect(),
            signatures: self.signatures.iter().cloned().collect(),
            artifacts: self.artifacts.iter().cloned().collect(),
            audit_events: self.audit_events.iter().cloned().collect(),
            notifications: self.notifications.iter().cloned().collect(),
        };

        data.templates.sort_by(|a, b| a.id.cmp(&b.id));
        data.documents.sort_by(|a, b| a.id.cmp(&b.id));
        data.versions.sort_by(|a, b| a.id.cmp(&b.id));
        data.fields.sort_by(|a, b| a.id.cmp(&b.id));
        data.parties.sort_by(|a, b| a.id.cmp(&b.id));
        data.instances.sort_by(|a, b| a.id.cmp(&b.id));
        data.steps.sort_by(|a, b| a.id.cmp(&b.id));
        data.requests.sort_by(|a, b| a.id.cmp(&b.id));
        data.signatures.sort_by(|a, b| a.id.cmp(&b.id));
        data.artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        data.audit_events.sort_by(|a, b| a.id.cmp(&b.id));
        data.notifications.sort_by(|a, b| a.id.cmp(&b.id));

        to_writer_pretty(writer, &data)?;

        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Data {
    #[serde(default)]
    templates: Vec<WorkflowTemplate>,

    #[serde(default)]
    documents: Vec<Document>,

    #[serde(default)]
    versions: Vec<DocumentVersion>,

    #[serde(default)]
    fields: Vec<Field>,

    #[serde(default)]
    parties: Vec<Party>,

    #[serde(default)]
    instances: Vec<WorkflowInstance>,

    #[serde(default)]
    steps: Vec<WorkflowStep>,

    #[serde(default)]
    requests: Vec<SignatureRequest>,

    #[serde(default)]
    signatures: Vec<Signature>,

    #[serde(default)]
    artifacts: Vec<AuditArtifact>,

    #[serde(default)]
    audit_events: Vec<AuditEvent>,

    #[serde(default)]
    notifications: Vec<InAppNotification>,
}
