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

mod blob_store;
mod composer;
mod notification;
mod signing;

pub use blob_store::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use composer::{
    ComposeError, DocumentComposer, FieldStamp, PdfComposer, ProtocolPage, StampContent,
};
pub use notification::{
    Attachment, CompletionNotice, LogGateway, NotificationGateway, Outgoing,
    SignatureRequestNotice,
};
pub use signing::{CertificateSigning, CmsSigning, SecurityResult, SigningError, Unconfigured};

#[cfg(test)]
pub use composer::{page_text, sample_pdf};
