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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::encode;
use chrono::{Duration, Utc};
use lopdf::Document as PdfDocument;
use miscellaneous::digest::sha256_hex;
use resources::{
    artifact::ArtifactType,
    audit_event::{Action, Outcome as AuditOutcome},
    document::{FieldType, Status as DocumentStatus, VersionKind},
    misc::TaxId,
    party::{Channel, SignatureMethod},
    primitives::Id,
    request::Status as RequestStatus,
    signature::{Confirmation, Outcome as SignatureOutcome, SignatureType},
    template::{ExecutionMode, StepConfig},
    workflow::Status as InstanceStatus,
    Document, DocumentVersion, Field, Party, SignatureRequest, WorkflowInstance,
};

use crate::{
    config::Config,
    external::{
        BlobStore, CertificateSigning, CompletionNotice, ComposeError, DocumentComposer,
        page_text, sample_pdf, FieldStamp, MemoryBlobStore, NotificationGateway, PdfComposer,
        ProtocolPage, SecurityResult, SignatureRequestNotice, SigningError, Unconfigured,
    },
    state::State,
};

use super::{
    ActionOutcome, Advance, ClientInfo, DispatchRequest, Error, FieldInput, Finalization,
    InlineStep, Service, SignPayload, SignatureAction,
};

/* collaborators */

pub struct RecordingGateway {
    fail: bool,
    requests: Mutex<Vec<SignatureRequestNotice>>,
    completed: Mutex<Vec<CompletionNotice>>,
}

impl RecordingGateway {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            requests: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SignatureRequestNotice> {
        self.requests.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<CompletionNotice> {
        self.completed.lock().unwrap().clone()
    }

    pub fn notified(&self, party_id: &Id) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|n| &n.party.id == party_id)
            .count()
    }

    /// Latest signing token delivered to the party for the document.
    pub fn token(&self, party_id: &Id, document_id: &Id) -> String {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|n| &n.party.id == party_id && &n.document.id == document_id)
            .map(|n| n.token.clone())
            .unwrap()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn notify_signature_request(&self, notice: &SignatureRequestNotice) -> bool {
        self.requests.lock().unwrap().push(notice.clone());

        !self.fail
    }

    async fn notify_workflow_completed(&self, notice: &CompletionNotice) -> bool {
        self.completed.lock().unwrap().push(notice.clone());

        !self.fail
    }
}

#[derive(Default)]
pub struct RecordingComposer {
    fail: AtomicBool,
    stamps: Mutex<Vec<FieldStamp>>,
}

impl RecordingComposer {
    pub fn set_failing(&self, value: bool) {
        self.fail.store(value, Ordering::SeqCst);
    }

    pub fn stamps(&self) -> Vec<FieldStamp> {
        self.stamps.lock().unwrap().clone()
    }
}

impl DocumentComposer for RecordingComposer {
    fn compose(
        &self,
        pdf: &[u8],
        protocol: &[ProtocolPage],
        stamps: &[FieldStamp],
        _blobs: &dyn BlobStore,
    ) -> Result<Vec<u8>, ComposeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ComposeError::Failed("renderer offline".into()));
        }

        self.stamps.lock().unwrap().extend(stamps.iter().cloned());

        let mut ret = pdf.to_vec();
        for page in protocol {
            ret.extend_from_slice(format!("% protocol {}/{}\n", page.number, page.total).as_bytes());
        }

        Ok(ret)
    }
}

/// Signs with a fixed detached signature and remembers the signed bytes.
#[derive(Default)]
pub struct RecordingSigning {
    signed: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSigning {
    pub fn signed(&self) -> Vec<Vec<u8>> {
        self.signed.lock().unwrap().clone()
    }
}

impl CertificateSigning for RecordingSigning {
    fn apply_security(&self, pdf: &[u8]) -> Result<SecurityResult, SigningError> {
        self.signed.lock().unwrap().push(pdf.to_vec());

        Ok(SecurityResult {
            signed_pdf: pdf.to_vec(),
            sha256: sha256_hex(pdf),
            timestamp: None,
            detached_signature: Some(b"pkcs7".to_vec()),
            warnings: Vec::new(),
        })
    }
}

pub struct FailingSigning;

impl CertificateSigning for FailingSigning {
    fn apply_security(&self, _pdf: &[u8]) -> Result<SecurityResult, SigningError> {
        Err(SigningError::Unavailable("timestamp authority offline".into()))
    }
}

/* fixture */

pub struct Fixture {
    pub service: Service,
    pub blobs: Arc<MemoryBlobStore>,
    pub gateway: Arc<RecordingGateway>,
    pub composer: Arc<RecordingComposer>,
    pub tenant: Id,
    pub user: Id,
    real_pdf: bool,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(Arc::new(Unconfigured), false)
    }

    pub fn build(signing: Arc<dyn CertificateSigning>, failing_gateway: bool) -> Self {
        Self::assemble(signing, failing_gateway, None)
    }

    /// Seeds real PDF documents and renders final versions with the PDF
    /// composer.
    pub fn rendering(signing: Arc<dyn CertificateSigning>) -> Self {
        Self::assemble(signing, false, Some(Arc::new(PdfComposer::default())))
    }

    fn assemble(
        signing: Arc<dyn CertificateSigning>,
        failing_gateway: bool,
        renderer: Option<Arc<dyn DocumentComposer>>,
    ) -> Self {
        let blobs = Arc::new(MemoryBlobStore::default());
        let gateway = Arc::new(RecordingGateway::new(failing_gateway));
        let composer = Arc::new(RecordingComposer::default());
        let real_pdf = renderer.is_some();
        let renderer = match renderer {
            Some(renderer) => renderer,
            None => composer.clone() as Arc<dyn DocumentComposer>,
        };

        let service = Service::new(
            State::new(),
            Config::default(),
            blobs.clone(),
            signing,
            renderer,
            gateway.clone(),
        );

        Self {
            service,
            blobs,
            gateway,
            composer,
            tenant: Id::generate(),
            user: Id::generate(),
            real_pdf,
        }
    }

    pub async fn document(&self, name: &str) -> Id {
        self.document_in_group(name, None, 0).await
    }

    pub async fn document_in_group(
        &self,
        name: &str,
        group_id: Option<&Id>,
        age_minutes: i64,
    ) -> Id {
        let now = Utc::now();
        let created_at = now - Duration::minutes(age_minutes);

        let id = Id::generate();
        let data = if self.real_pdf {
            sample_pdf(name)
        } else {
            format!("%PDF-1.4\n% {}\n%%EOF\n", name).into_bytes()
        };
        let root = self.service.config().document_root(&self.tenant, &id);
        let storage_path = self.blobs.save_bytes(&root, "original.pdf", &data).unwrap();

        let version = DocumentVersion {
            id: Id::generate(),
            document_id: id.clone(),
            number: 1,
            kind: VersionKind::Original,
            filename: format!("{}.pdf", name),
            storage_path,
            sha256: sha256_hex(&data),
            size: data.len(),
            created_at,
        };
        let document = Document {
            id: id.clone(),
            tenant_id: self.tenant.clone(),
            name: name.into(),
            status: DocumentStatus::Draft,
            created_by: self.user.clone(),
            group_id: group_id.cloned(),
            current_version_id: Some(version.id.clone()),
            created_at,
            updated_at: created_at,
            deleted_at: None,
        };

        let mut inner = self.service.state().lock().await;
        let documents = inner.documents_mut();
        documents.insert(document);
        documents.insert_version(version);

        id
    }

    pub async fn add_party(&self, party: Party) -> Id {
        let id = party.id.clone();

        self.service
            .state()
            .lock()
            .await
            .documents_mut()
            .insert_party(party);

        id
    }

    pub async fn add_field(
        &self,
        document_id: &Id,
        role: &str,
        field_type: FieldType,
        label: &str,
    ) -> Id {
        let mut inner = self.service.state().lock().await;
        let version_id = inner
            .documents
            .current_version(document_id)
            .unwrap()
            .id
            .clone();

        let field = Field {
            id: Id::generate(),
            document_id: document_id.clone(),
            version_id,
            role: role.into(),
            field_type,
            label: Some(label.into()),
            required: true,
            page: 1,
            x: 72.0,
            y: 640.0,
            width: 220.0,
            height: 48.0,
        };
        let id = field.id.clone();
        inner.documents_mut().insert_field(field);

        id
    }

    pub async fn template(&self, steps: Vec<StepConfig>) -> Id {
        self.service
            .template_create(
                self.tenant.clone(),
                Id::generate(),
                "Service agreement".into(),
                None,
                steps,
            )
            .await
            .unwrap()
            .id
    }

    pub async fn dispatch(
        &self,
        document_id: &Id,
        request: DispatchRequest,
    ) -> Result<WorkflowInstance, Error> {
        self.service
            .dispatch(&self.tenant, &self.user, document_id, &request)
            .await
    }

    /// Acts through the signing link last sent to the party.
    pub async fn act(
        &self,
        party_id: &Id,
        document_id: &Id,
        action: SignatureAction,
    ) -> Result<ActionOutcome, Error> {
        let token = self.gateway.token(party_id, document_id);

        self.service
            .apply_with_token(&token, action, &client())
            .await
    }

    pub async fn request_of(&self, party_id: &Id, document_id: &Id) -> SignatureRequest {
        self.service
            .state()
            .lock()
            .await
            .requests
            .iter()
            .find(|r| &r.party_id == party_id && &r.document_id == document_id)
            .cloned()
            .unwrap()
    }

    /// Moves the token expiry of the request into the past.
    pub async fn expire_token(&self, request_id: &Id, ago: Duration) {
        let mut inner = self.service.state().lock().await;

        inner.requests.get_mut(request_id).unwrap().token_expires_at = Some(Utc::now() - ago);
    }

    pub async fn current_version(&self, document_id: &Id) -> DocumentVersion {
        self.service
            .state()
            .lock()
            .await
            .documents
            .current_version(document_id)
            .cloned()
            .unwrap()
    }

    pub async fn document_state(&self, document_id: &Id) -> (Document, VersionKind) {
        let inner = self.service.state().lock().await;

        let document = inner.documents.get(document_id).cloned().unwrap();
        let kind = inner.documents.current_version(document_id).unwrap().kind;

        (document, kind)
    }

    pub async fn artifact_count(&self, document_id: &Id, type_: ArtifactType) -> usize {
        self.service
            .state()
            .lock()
            .await
            .artifacts
            .for_document(document_id, type_)
            .len()
    }

    pub async fn audit_outcomes(&self, document_id: &Id, action: Action) -> Vec<AuditOutcome> {
        self.service
            .state()
            .lock()
            .await
            .audit_events
            .for_document(document_id)
            .into_iter()
            .filter(|e| e.action == action)
            .map(|e| e.outcome)
            .collect()
    }
}

pub fn party(document_id: &Id, name: &str, role: &str, order_index: u32) -> Party {
    Party {
        id: Id::generate(),
        document_id: document_id.clone(),
        name: name.into(),
        email: Some(format!("{}@example.com", name.to_lowercase().replace(' ', "."))),
        phone: Some("+55 11 91234-5678".into()),
        role: role.into(),
        company: None,
        tax_id: None,
        order_index,
        notification_channel: Channel::Email,
        signature_method: SignatureMethod::Electronic,
        allow_typed_name: true,
        allow_signature_image: true,
        require_email_confirmation: false,
        require_phone_confirmation: false,
    }
}

pub fn step(order: u32, role: &str, execution_mode: ExecutionMode) -> StepConfig {
    StepConfig {
        order,
        role: role.into(),
        action: Default::default(),
        execution_mode,
        deadline_hours: None,
    }
}

pub fn typed(name: &str) -> SignatureAction {
    SignatureAction::Sign(SignPayload {
        typed_name: Some(name.into()),
        consent_given: true,
        ..Default::default()
    })
}

pub fn client() -> ClientInfo {
    ClientInfo {
        ip: Some("203.0.113.7".into()),
        user_agent: Some("Mozilla/5.0".into()),
    }
}

fn png_data_url() -> String {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);

    format!("data:image/png;base64,{}", encode(&data))
}

/* dispatch and sequencing */

#[tokio::test]
async fn single_signer_completes_document() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", " Signer ", 0)).await;
    let template = f.template(vec![step(1, "signer", ExecutionMode::Sequential)]).await;

    let instance = f
        .dispatch(
            &doc,
            DispatchRequest {
                template_id: Some(template),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);

    let status = f.service.workflow_status(&f.tenant, &doc).await.unwrap();
    assert_eq!(status.requests.len(), 1);
    assert!(status.requests[0].is_open());
    assert_eq!(f.gateway.notified(&maria), 1);

    let outcome = f.act(&maria, &doc, typed("Maria Silva")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Completed);
    assert_eq!(
        outcome.signature.typed_name_hash.as_deref(),
        Some(sha256_hex(b"Maria Silva").as_str())
    );
    assert_eq!(outcome.signature.signature_type, SignatureType::Electronic);
    assert_eq!(outcome.signature.signer_ip.as_deref(), Some("203.0.113.7"));

    let status = f.service.workflow_status(&f.tenant, &doc).await.unwrap();
    assert_eq!(status.instance.status, InstanceStatus::Completed);
    assert_eq!(status.requests[0].status, RequestStatus::Signed);

    let (document, kind) = f.document_state(&doc).await;
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(kind, VersionKind::Final);
    assert_eq!(f.artifact_count(&doc, ArtifactType::FinalReport).await, 1);

    let completed = f.gateway.completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].parties.len(), 1);
    assert_eq!(completed[0].extra_recipients, vec![f.user.clone()]);

    let titles = f
        .service
        .notifications_for(&f.user)
        .await
        .into_iter()
        .map(|n| n.title)
        .collect::<Vec<_>>();
    assert!(titles.contains(&"Document signed".to_owned()));
    assert!(titles.contains(&"Workflow completed".to_owned()));
}

#[tokio::test]
async fn second_sign_is_rejected() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    let bruno = f.add_party(party(&doc, "Bruno Costa", "signer", 1)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    f.act(&maria, &doc, typed("Maria Silva")).await.unwrap();

    let err = f.act(&maria, &doc, typed("Maria Silva")).await.unwrap_err();
    assert!(matches!(err, Error::RequestAlreadyClosed(_)));

    let request = f.request_of(&maria, &doc).await;
    let err = f
        .service
        .apply(&f.tenant, &request.id, typed("Maria Silva"), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RequestAlreadyClosed(_)));

    let inner = f.service.state().lock().await;
    assert_eq!(inner.signatures.for_request(&request.id).len(), 1);
    assert_eq!(
        inner.requests.iter().filter(|r| r.party_id == bruno).count(),
        1
    );
}

#[tokio::test]
async fn sequential_steps_are_notified_in_order() {
    let f = Fixture::new();
    let doc = f.document("lease").await;
    let tenant_party = f.add_party(party(&doc, "Ana Souza", "tenant", 0)).await;
    let landlord = f.add_party(party(&doc, "Carlos Lima", "landlord", 1)).await;
    let template = f
        .template(vec![
            step(1, "tenant", ExecutionMode::Sequential),
            step(2, "landlord", ExecutionMode::Sequential),
        ])
        .await;

    f.dispatch(
        &doc,
        DispatchRequest {
            template_id: Some(template),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(f.gateway.notified(&tenant_party), 1);
    assert_eq!(f.gateway.notified(&landlord), 0);

    let second = f.request_of(&landlord, &doc).await;
    assert_eq!(second.status, RequestStatus::Pending);
    assert_eq!(second.token_hash, None);

    let err = f
        .service
        .apply(&f.tenant, &second.id, typed("Carlos Lima"), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StepNotReady(_)));

    let outcome = f.act(&tenant_party, &doc, typed("Ana Souza")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Notified(1));
    assert_eq!(f.gateway.notified(&landlord), 1);

    let status = f.service.workflow_status(&f.tenant, &doc).await.unwrap();
    let first_done = status.steps[0].completed_at.unwrap();
    let second = f.request_of(&landlord, &doc).await;
    assert_eq!(second.status, RequestStatus::Sent);
    assert!(second.sent_at.unwrap() >= first_done);

    let outcome = f.act(&landlord, &doc, typed("Carlos Lima")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Completed);
}

#[tokio::test]
async fn parallel_block_is_notified_together() {
    let f = Fixture::new();
    let doc = f.document("board resolution").await;
    let a = f.add_party(party(&doc, "Ana Souza", "director", 0)).await;
    let b = f.add_party(party(&doc, "Bruno Costa", "director", 1)).await;
    let c = f.add_party(party(&doc, "Clara Dias", "secretary", 2)).await;
    let template = f
        .template(vec![
            step(1, "director", ExecutionMode::Parallel),
            step(2, "director", ExecutionMode::Parallel),
            step(3, "secretary", ExecutionMode::Sequential),
        ])
        .await;

    f.dispatch(
        &doc,
        DispatchRequest {
            template_id: Some(template),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(f.gateway.notified(&a), 1);
    assert_eq!(f.gateway.notified(&b), 1);
    assert_eq!(f.gateway.notified(&c), 0);

    let outcome = f.act(&b, &doc, typed("Bruno Costa")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Idle);
    assert_eq!(f.gateway.notified(&c), 0);

    let outcome = f.act(&a, &doc, typed("Ana Souza")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Notified(1));
    assert_eq!(f.gateway.notified(&c), 1);
}

#[tokio::test]
async fn inline_steps_override_party_order() {
    let f = Fixture::new();
    let doc = f.document("nda").await;
    let a = f.add_party(party(&doc, "Ana Souza", "signer", 0)).await;
    let b = f.add_party(party(&doc, "Bruno Costa", "signer", 1)).await;

    let inline = |party_id: &Id, order| InlineStep {
        party_id: party_id.clone(),
        order,
        action: Default::default(),
        execution_mode: ExecutionMode::Sequential,
        deadline_hours: Some(48),
    };

    f.dispatch(
        &doc,
        DispatchRequest {
            template_id: None,
            steps: vec![inline(&b, 1), inline(&a, 2)],
        },
    )
    .await
    .unwrap();

    assert_eq!(f.gateway.notified(&b), 1);
    assert_eq!(f.gateway.notified(&a), 0);

    let status = f.service.workflow_status(&f.tenant, &doc).await.unwrap();
    assert_eq!(status.steps[0].party_id, b);
    assert!(status.steps[0].deadline_at.is_some());
}

#[tokio::test]
async fn insufficient_parties_persist_nothing() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    let template = f
        .template(vec![
            step(1, "signer", ExecutionMode::Sequential),
            step(2, "signer", ExecutionMode::Sequential),
        ])
        .await;

    let err = f
        .dispatch(
            &doc,
            DispatchRequest {
                template_id: Some(template),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    match err {
        Error::InsufficientParties {
            role,
            required,
            available,
        } => {
            assert_eq!(role, "signer");
            assert_eq!(required, 2);
            assert_eq!(available, 1);
        }
        err => panic!("Unexpected error: {}", err),
    }

    let err = f.service.workflow_status(&f.tenant, &doc).await.unwrap_err();
    assert!(matches!(err, Error::WorkflowNotFound(_)));

    let inner = f.service.state().lock().await;
    assert_eq!(inner.requests.iter().count(), 0);
    assert_eq!(inner.workflows.steps().count(), 0);
    assert_eq!(inner.documents.get(&doc).unwrap().status, DocumentStatus::Draft);
    assert!(f.gateway.requests().is_empty());
}

#[tokio::test]
async fn missing_contact_data_is_reported_for_every_party() {
    let f = Fixture::new();
    let doc = f.document("contract").await;

    let mut ana = party(&doc, "Ana Souza", "signer", 0);
    ana.email = None;
    let mut bruno = party(&doc, "Bruno Costa", "signer", 1);
    bruno.notification_channel = Channel::Sms;
    bruno.phone = Some("  ".into());
    let ana = f.add_party(ana).await;
    let bruno = f.add_party(bruno).await;
    f.add_party(party(&doc, "Clara Dias", "signer", 2)).await;

    let err = f.dispatch(&doc, DispatchRequest::default()).await.unwrap_err();
    match &err {
        Error::ContactDataMissing(problems) => {
            let ids = problems.iter().map(|p| &p.party_id).collect::<Vec<_>>();
            assert_eq!(ids, vec![&ana, &bruno]);
            assert_eq!(problems[1].channel, Channel::Sms);
        }
        err => panic!("Unexpected error: {}", err),
    }

    let message = err.to_string();
    assert!(message.contains("Ana Souza"));
    assert!(message.contains("Bruno Costa"));
    assert!(!message.contains("Clara Dias"));

    assert_eq!(
        f.audit_outcomes(&doc, Action::Dispatch).await,
        vec![AuditOutcome::MinorFailure]
    );
}

#[tokio::test]
async fn dispatch_requires_draft_or_review() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;

    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let err = f.dispatch(&doc, DispatchRequest::default()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidDocumentStatus(_, DocumentStatus::InProgress)
    ));

    let other_tenant = Id::generate();
    let err = f
        .service
        .dispatch(&other_tenant, &f.user, &doc, &DispatchRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound(_)));
}

/* signing links */

#[tokio::test]
async fn signing_link_survives_grace_window() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.add_field(&doc, "signer", FieldType::TypedName, "Full name").await;
    f.add_field(&doc, "witness", FieldType::TypedName, "Witness name").await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let token = f.gateway.token(&maria, &doc);
    let view = f.service.resolve_token(&token).await.unwrap();
    assert_eq!(view.party.id, maria);
    assert_eq!(view.document.id, doc);
    assert_eq!(view.fields.len(), 1);

    let err = f
        .service
        .resolve_token(&format!("{}x", token))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidToken));

    let request_id = view.request.id.clone();

    f.expire_token(&request_id, Duration::days(2)).await;
    let view = f.service.resolve_token(&token).await.unwrap();
    assert!(view.request.token_expires_at.unwrap() > Utc::now() + Duration::hours(23));
    assert_eq!(
        f.audit_outcomes(&doc, Action::TokenGraceUsed).await,
        vec![AuditOutcome::Success]
    );

    f.expire_token(&request_id, Duration::days(31)).await;
    let err = f.service.resolve_token(&token).await.unwrap_err();
    assert!(matches!(err, Error::TokenExpired));

    let err = f.act(&maria, &doc, typed("Maria Silva")).await.unwrap_err();
    assert!(matches!(err, Error::TokenExpired));
}

#[tokio::test]
async fn resend_reissues_current_phase_only() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let a = f.add_party(party(&doc, "Ana Souza", "signer", 0)).await;
    let b = f.add_party(party(&doc, "Bruno Costa", "signer", 1)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let old_token = f.gateway.token(&a, &doc);

    let count = f.service.resend_pending(&f.tenant, &doc).await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(f.gateway.notified(&a), 2);
    assert_eq!(f.gateway.notified(&b), 0);

    let err = f.service.resolve_token(&old_token).await.unwrap_err();
    assert!(matches!(err, Error::InvalidToken));
    assert!(f.service.resolve_token(&f.gateway.token(&a, &doc)).await.is_ok());
    assert_eq!(
        f.audit_outcomes(&doc, Action::Resend).await,
        vec![AuditOutcome::Success]
    );

    let other = f.document("unrelated").await;
    let err = f.service.resend_pending(&f.tenant, &other).await.unwrap_err();
    assert!(matches!(err, Error::WorkflowNotFound(_)));
}

#[tokio::test]
async fn failed_delivery_keeps_workflow_state() {
    let f = Fixture::build(Arc::new(Unconfigured), true);
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;

    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    assert_eq!(f.request_of(&maria, &doc).await.status, RequestStatus::Sent);
    assert_eq!(
        f.audit_outcomes(&doc, Action::NotificationFailed).await,
        vec![AuditOutcome::MinorFailure]
    );
    assert!(f
        .audit_outcomes(&doc, Action::NotificationSent)
        .await
        .is_empty());
}

/* evidence */

#[tokio::test]
async fn digital_signature_needs_matching_tax_id() {
    let f = Fixture::new();
    let doc = f.document("deed").await;

    let mut maria = party(&doc, "Maria Silva", "signer", 0);
    maria.signature_method = SignatureMethod::Digital;
    maria.tax_id = Some(TaxId::new("123.456.789-09").unwrap());
    let maria = f.add_party(maria).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let certificate = |subject: &str| {
        SignatureAction::Sign(SignPayload {
            certificate_subject: Some(subject.into()),
            certificate_issuer: Some("AC SOLUTI Multipla v5".into()),
            certificate_serial: Some("5A3F09".into()),
            signature_type: Some("ICP-Brasil A3".into()),
            ..Default::default()
        })
    };

    let err = f
        .act(&maria, &doc, certificate("CN=MARIA SILVA:98765432100"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CertificateIdentityMismatch(_)));
    assert_eq!(f.request_of(&maria, &doc).await.status, RequestStatus::Sent);

    let outcome = f
        .act(&maria, &doc, certificate("CN=MARIA SILVA:12345678909"))
        .await
        .unwrap();
    assert_eq!(outcome.signature.signature_type, SignatureType::Digital);
    assert_eq!(outcome.signature.certificate_serial.as_deref(), Some("5A3F09"));

    let metadata = outcome.signature.evidence.certificate.unwrap();
    assert_eq!(metadata.extracted_tax_id.as_deref(), Some("12345678909"));
    assert!(!metadata.tax_id_confirmed_by_signer);
}

#[tokio::test]
async fn electronic_signature_rejects_certificate() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let action = SignatureAction::Sign(SignPayload {
        typed_name: Some("Maria Silva".into()),
        certificate_serial: Some("01".into()),
        ..Default::default()
    });

    let err = f.act(&maria, &doc, action).await.unwrap_err();
    assert!(matches!(err, Error::MethodMismatch(_)));
    assert_eq!(
        f.audit_outcomes(&doc, Action::Sign).await,
        vec![AuditOutcome::MinorFailure]
    );

    let request = f.request_of(&maria, &doc).await;
    assert!(f
        .service
        .state()
        .lock()
        .await
        .signatures
        .for_request(&request.id)
        .is_empty());
}

#[tokio::test]
async fn signing_link_requires_contact_confirmation() {
    let f = Fixture::new();
    let doc = f.document("contract").await;

    let mut maria = party(&doc, "Maria Silva", "signer", 0);
    maria.require_phone_confirmation = true;
    let maria = f.add_party(maria).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let confirm = |last4: &str| {
        SignatureAction::Sign(SignPayload {
            typed_name: Some("Maria Silva".into()),
            confirm_phone_last4: Some(last4.into()),
            ..Default::default()
        })
    };

    let err = f.act(&maria, &doc, confirm("0000")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ContactConfirmationFailed(Confirmation::PhoneLast4)
    ));

    let outcome = f.act(&maria, &doc, confirm("5678")).await.unwrap();
    assert_eq!(
        outcome.signature.evidence.confirmations,
        vec![Confirmation::PhoneLast4]
    );
    assert!(outcome.signature.evidence.via_token);
}

#[tokio::test]
async fn signature_image_requires_consent() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let image = |consent_given| {
        SignatureAction::Sign(SignPayload {
            signature_image: Some(png_data_url()),
            consent_given,
            consent_text: Some("I agree to sign electronically".into()),
            ..Default::default()
        })
    };

    let blobs = f.blobs.len();
    let err = f.act(&maria, &doc, image(false)).await.unwrap_err();
    assert!(matches!(err, Error::ConsentRequired));
    assert_eq!(f.blobs.len(), blobs);

    let outcome = f.act(&maria, &doc, image(true)).await.unwrap();
    let evidence = outcome.signature.image.unwrap();
    assert_eq!(evidence.mime, "image/png");
    assert_eq!(evidence.filename, "signature.png");
    assert!(outcome.signature.evidence.signature_image);
    assert_eq!(
        outcome.signature.consent.unwrap().text.as_deref(),
        Some("I agree to sign electronically")
    );
    assert_eq!(f.artifact_count(&doc, ArtifactType::SignatureImage).await, 1);
}

#[tokio::test]
async fn required_field_must_receive_a_value() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    let field = f
        .add_field(&doc, "signer", FieldType::TypedName, "Full name")
        .await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let empty = SignatureAction::Sign(SignPayload {
        consent_given: true,
        ..Default::default()
    });
    let err = f.act(&maria, &doc, empty).await.unwrap_err();
    match err {
        Error::MissingRequiredField(fields) => assert_eq!(fields, vec!["Full name".to_owned()]),
        err => panic!("Unexpected error: {}", err),
    }

    let filled = SignatureAction::Sign(SignPayload {
        field_values: vec![FieldInput {
            field_id: field.clone(),
            typed_name: Some("Maria Silva".into()),
            image: None,
            image_mime: None,
            image_name: None,
        }],
        ..Default::default()
    });
    let outcome = f.act(&maria, &doc, filled).await.unwrap();

    let value = outcome.signature.field_values.get(&field).unwrap();
    assert_eq!(value.typed_name.as_deref(), Some("Maria Silva"));
    assert_eq!(
        value.typed_name_hash.as_deref(),
        Some(sha256_hex(b"Maria Silva").as_str())
    );
    assert_eq!(outcome.signature.evidence.field_signature_ids, vec![field.clone()]);

    let stamps = f.composer.stamps();
    assert_eq!(stamps.len(), 1);
    assert_eq!(stamps[0].field_id, field);
}

#[tokio::test]
async fn refusal_rejects_workflow() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let a = f.add_party(party(&doc, "Ana Souza", "signer", 0)).await;
    let b = f.add_party(party(&doc, "Bruno Costa", "signer", 1)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let outcome = f
        .act(
            &a,
            &doc,
            SignatureAction::Refuse {
                reason: Some("Wrong amount".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.signature.outcome, SignatureOutcome::Refused);
    assert_eq!(outcome.signature.reason.as_deref(), Some("Wrong amount"));
    assert_eq!(outcome.advance, Advance::Idle);

    let status = f.service.workflow_status(&f.tenant, &doc).await.unwrap();
    assert_eq!(status.instance.status, InstanceStatus::Rejected);

    let (document, kind) = f.document_state(&doc).await;
    assert_eq!(document.status, DocumentStatus::Rejected);
    assert_eq!(kind, VersionKind::Original);
    assert_eq!(f.gateway.notified(&b), 0);
    assert!(f.gateway.completed().is_empty());
}

/* group workflows */

#[tokio::test]
async fn group_dispatch_fans_out_requests() {
    let f = Fixture::new();
    let group = Id::generate();
    let first = f.document_in_group("contract", Some(&group), 10).await;
    let second = f.document_in_group("annex", Some(&group), 5).await;
    let maria = f.add_party(party(&first, "Maria Silva", "signer", 0)).await;

    let instance = f
        .service
        .dispatch_group(&f.tenant, &f.user, &group, &DispatchRequest::default())
        .await
        .unwrap();
    assert!(instance.is_group_workflow);
    assert_eq!(instance.document_id, first);
    assert_eq!(instance.document_ids(), vec![&first, &second]);
    assert_eq!(f.gateway.notified(&maria), 2);

    let count = f.service.resend_group(&f.tenant, &group).await.unwrap();
    assert_eq!(count, 2);

    let outcome = f.act(&maria, &second, typed("Maria Silva")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Idle);

    let outcome = f.act(&maria, &first, typed("Maria Silva")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Completed);

    for doc in [&first, &second] {
        let (document, kind) = f.document_state(doc).await;
        assert_eq!(document.status, DocumentStatus::Completed);
        assert_eq!(kind, VersionKind::Final);
    }
    assert_eq!(f.gateway.completed().len(), 2);

    let err = f
        .service
        .dispatch_group(&f.tenant, &f.user, &Id::generate(), &DispatchRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GroupNotFound(_)));
}

#[tokio::test]
async fn group_completion_closes_remaining_requests() {
    let f = Fixture::new();
    let group = Id::generate();
    let first = f.document_in_group("contract", Some(&group), 10).await;
    let second = f.document_in_group("annex", Some(&group), 5).await;
    let maria = f.add_party(party(&first, "Maria Silva", "signer", 0)).await;

    f.service
        .dispatch_group(&f.tenant, &f.user, &group, &DispatchRequest::default())
        .await
        .unwrap();

    let outcome = f.act(&maria, &first, typed("Maria Silva")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Completed);

    let request = f.request_of(&maria, &second).await;
    assert!(!request.is_open());
    assert_eq!(request.status, RequestStatus::Expired);
    assert!(request.closed_at.is_some());
    assert_eq!(
        f.audit_outcomes(&second, Action::Expire).await,
        vec![AuditOutcome::Success]
    );
    assert!(f.audit_outcomes(&first, Action::Expire).await.is_empty());

    let err = f.act(&maria, &second, typed("Maria Silva")).await.unwrap_err();
    assert!(matches!(err, Error::RequestAlreadyClosed(_)));

    let status = f.service.workflow_status(&f.tenant, &second).await.unwrap();
    assert!(status.requests.iter().all(|r| !r.is_open()));
}

/* signed documents */

fn signed_pdf(data: &[u8], digest: String) -> SignatureAction {
    SignatureAction::Sign(SignPayload {
        confirm_tax_id: Some("123.456.789-09".into()),
        signed_pdf: Some(format!("data:application/pdf;base64,{}", encode(data))),
        signed_pdf_name: Some("deed-signed.pdf".into()),
        signed_pdf_digest: Some(digest),
        ..Default::default()
    })
}

async fn digital_signer(f: &Fixture, doc: &Id) -> Id {
    let mut maria = party(doc, "Maria Silva", "signer", 0);
    maria.signature_method = SignatureMethod::Digital;
    maria.tax_id = Some(TaxId::new("123.456.789-09").unwrap());

    f.add_party(maria).await
}

#[tokio::test]
async fn signed_pdf_is_kept_as_evidence() {
    let f = Fixture::new();
    let doc = f.document("deed").await;
    let maria = digital_signer(&f, &doc).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let data = b"%PDF-1.7\n% signed by the signer's own tool\n%%EOF\n";
    let digest = sha256_hex(data);

    let outcome = f
        .act(&maria, &doc, signed_pdf(data, digest.to_uppercase()))
        .await
        .unwrap();
    assert_eq!(outcome.signature.digest_sha256.as_deref(), Some(digest.as_str()));
    assert_eq!(outcome.signature.signature_type, SignatureType::Digital);
    assert!(outcome.signature.evidence.signed_pdf);
    assert!(outcome.signature.evidence.confirmations.contains(&Confirmation::TaxId));

    let artifact = {
        let inner = f.service.state().lock().await;
        let artifacts = inner.artifacts.for_document(&doc, ArtifactType::SignedPdf);
        assert_eq!(artifacts.len(), 1);

        artifacts[0].clone()
    };
    assert_eq!(artifact.sha256, digest);
    assert_eq!(artifact.mime, "application/pdf");
    assert_eq!(f.blobs.load_bytes(&artifact.storage_path).unwrap(), data.to_vec());
}

#[tokio::test]
async fn signed_pdf_with_wrong_digest_is_rejected() {
    let f = Fixture::new();
    let doc = f.document("deed").await;
    let maria = digital_signer(&f, &doc).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let data = b"%PDF-1.7\n% signed\n%%EOF\n";
    let err = f
        .act(&maria, &doc, signed_pdf(data, sha256_hex(b"something else")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptSignedArtifact(_)));

    let request = f.request_of(&maria, &doc).await;
    assert_eq!(request.status, RequestStatus::Sent);
    assert_eq!(f.artifact_count(&doc, ArtifactType::SignedPdf).await, 0);
    assert!(f
        .service
        .state()
        .lock()
        .await
        .signatures
        .for_request(&request.id)
        .is_empty());

    f.act(&maria, &doc, signed_pdf(data, sha256_hex(data)))
        .await
        .unwrap();
}

#[tokio::test]
async fn signed_pdf_counts_as_certificate_evidence() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let data = b"%PDF-1.7\n% signed\n%%EOF\n";
    let action = SignatureAction::Sign(SignPayload {
        typed_name: Some("Maria Silva".into()),
        signed_pdf: Some(encode(data)),
        ..Default::default()
    });

    let err = f.act(&maria, &doc, action).await.unwrap_err();
    assert!(matches!(err, Error::MethodMismatch(_)));
    assert!(f.request_of(&maria, &doc).await.is_open());
    assert_eq!(f.artifact_count(&doc, ArtifactType::SignedPdf).await, 0);
}

/* finalization */

#[tokio::test]
async fn repeated_advance_finalizes_once() {
    let f = Fixture::new();
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    let instance = f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    f.act(&maria, &doc, typed("Maria Silva")).await.unwrap();

    let ctx = f.service.context();
    for _ in 0..2 {
        let (advance, outbox) = f
            .service
            .state()
            .transaction(|inner| inner.workflow_advance(&ctx, &instance.id))
            .await
            .unwrap();

        assert_eq!(advance, Advance::Idle);
        assert!(outbox.is_empty());
    }

    let ret = f.service.finalize(&f.tenant, &doc).await.unwrap();
    assert_eq!(ret, Finalization::Skipped);

    assert_eq!(f.artifact_count(&doc, ArtifactType::FinalReport).await, 1);
    assert_eq!(f.gateway.completed().len(), 1);
}

#[tokio::test]
async fn failed_finalization_can_be_retried() {
    let f = Fixture::build(Arc::new(FailingSigning), false);
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let err = f.service.finalize(&f.tenant, &doc).await.unwrap_err();
    assert!(matches!(err, Error::InvalidDocumentStatus(_, _)));

    f.composer.set_failing(true);
    let outcome = f.act(&maria, &doc, typed("Maria Silva")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Completed);

    let (document, kind) = f.document_state(&doc).await;
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(kind, VersionKind::Original);
    assert_eq!(f.artifact_count(&doc, ArtifactType::FinalReport).await, 0);
    assert!(f
        .audit_outcomes(&doc, Action::FinalizeFailed)
        .await
        .contains(&AuditOutcome::SeriousFailure));

    f.composer.set_failing(false);
    match f.service.finalize(&f.tenant, &doc).await.unwrap() {
        Finalization::Finalized { warnings, .. } => {
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].starts_with("Certificate signing failed"));
        }
        Finalization::Skipped => panic!("Document was not finalized"),
    }

    let (_, kind) = f.document_state(&doc).await;
    assert_eq!(kind, VersionKind::Final);
    assert_eq!(f.artifact_count(&doc, ArtifactType::FinalReport).await, 1);
    assert_eq!(f.artifact_count(&doc, ArtifactType::TimestampToken).await, 0);
    assert_eq!(f.gateway.completed().len(), 1);

    let ret = f.service.finalize(&f.tenant, &doc).await.unwrap();
    assert_eq!(ret, Finalization::Skipped);
}

#[tokio::test]
async fn final_document_embeds_protocol_and_stamps() {
    let f = Fixture::rendering(Arc::new(Unconfigured));
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.add_field(&doc, "signer", FieldType::TypedName, "Signature").await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    let original = f.current_version(&doc).await;
    let original = f.blobs.load_bytes(&original.storage_path).unwrap();
    assert_eq!(PdfDocument::load_mem(&original).unwrap().get_pages().len(), 1);

    let outcome = f.act(&maria, &doc, typed("Maria Silva")).await.unwrap();
    assert_eq!(outcome.advance, Advance::Completed);

    let version = f.current_version(&doc).await;
    assert_eq!(version.kind, VersionKind::Final);

    let bytes = f.blobs.load_bytes(&version.storage_path).unwrap();
    assert_ne!(bytes, original);
    assert_eq!(version.sha256, sha256_hex(&bytes));

    let pdf = PdfDocument::load_mem(&bytes).unwrap();
    let pages = pdf.get_pages().len() as u32;
    assert!(pages > 1);
    assert!(page_text(&pdf, 1).contains("contract"));
    assert!(page_text(&pdf, 1).contains("Maria Silva"));
    assert!(page_text(&pdf, 2).contains("SIGNATURE PROTOCOL"));
    assert!((2..=pages).any(|page| page_text(&pdf, page).contains("Maria Silva")));

    let report = {
        let inner = f.service.state().lock().await;
        let artifacts = inner.artifacts.for_document(&doc, ArtifactType::FinalReport);

        artifacts[0].storage_path.clone()
    };
    let report = String::from_utf8(f.blobs.load_bytes(&report).unwrap()).unwrap();
    assert!(report.contains("SIGNATURE PROTOCOL"));
    assert!(report.contains("No signing certificate or timestamp authority configured"));
}

#[tokio::test]
async fn detached_signature_covers_final_document() {
    let signing = Arc::new(RecordingSigning::default());
    let f = Fixture::rendering(signing.clone());
    let doc = f.document("contract").await;
    let maria = f.add_party(party(&doc, "Maria Silva", "signer", 0)).await;
    f.dispatch(&doc, DispatchRequest::default()).await.unwrap();

    f.act(&maria, &doc, typed("Maria Silva")).await.unwrap();

    let version = f.current_version(&doc).await;
    let bytes = f.blobs.load_bytes(&version.storage_path).unwrap();

    let signed = signing.signed();
    assert_eq!(signed.len(), 1);
    assert_eq!(signed[0], bytes);
    assert!(PdfDocument::load_mem(&signed[0]).unwrap().get_pages().len() > 1);
    assert_eq!(f.artifact_count(&doc, ArtifactType::DetachedSignature).await, 1);

    let text = {
        let inner = f.service.state().lock().await;
        inner
            .audit_events
            .for_document(&doc)
            .into_iter()
            .find(|e| e.action == Action::Finalize)
            .and_then(|e| e.text.clone())
            .unwrap()
    };
    assert!(text.contains("detached signature covers the final document"));
}
