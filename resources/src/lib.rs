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

#[macro_use]
extern crate lazy_static;

pub mod artifact;
pub mod audit_event;
pub mod document;
pub mod misc;
pub mod notification;
pub mod party;
pub mod primitives;
pub mod request;
pub mod signature;
pub mod template;
pub mod workflow;

pub use artifact::AuditArtifact;
pub use audit_event::AuditEvent;
pub use document::{Document, DocumentVersion, Field};
pub use notification::InAppNotification;
pub use party::Party;
pub use request::SignatureRequest;
pub use signature::Signature;
pub use template::WorkflowTemplate;
pub use workflow::{WorkflowInstance, WorkflowStep};
