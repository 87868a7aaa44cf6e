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

mod image;
mod pdf;

pub use pdf::PdfComposer;

#[cfg(test)]
pub use pdf::tests::{page_text, sample_pdf};

use lopdf::Error as PdfError;
use resources::primitives::Id;
use thiserror::Error;

use super::{BlobError, BlobStore};

/// One page of the rendered signature protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolPage {
    pub number: usize,
    pub total: usize,
    pub lines: Vec<String>,
}

/// Captured field evidence to be drawn at the field's page location.
///
/// `page` starts at 1. `x` and `y` are points measured from the top left
/// corner of the page.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldStamp {
    pub field_id: Id,
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub content: StampContent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StampContent {
    Text(String),
    Image { storage_path: String, mime: String },
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Document is not a valid PDF: {0}!")]
    InvalidDocument(String),

    #[error("Unsupported Image: {0}!")]
    UnsupportedImage(String),

    #[error("Blob Error: {0}")]
    BlobError(BlobError),

    #[error("PDF Error: {0}")]
    PdfError(PdfError),

    #[error("Unable to compose document: {0}!")]
    Failed(String),
}

impl From<BlobError> for ComposeError {
    fn from(v: BlobError) -> Self {
        Self::BlobError(v)
    }
}

impl From<PdfError> for ComposeError {
    fn from(v: PdfError) -> Self {
        Self::PdfError(v)
    }
}

/// Appends the protocol pages to a PDF and draws the field stamps onto it.
/// Image stamps are loaded from the blob store.
pub trait DocumentComposer: Send + Sync {
    fn compose(
        &self,
        pdf: &[u8],
        protocol: &[ProtocolPage],
        stamps: &[FieldStamp],
        blobs: &dyn BlobStore,
    ) -> Result<Vec<u8>, ComposeError>;
}
