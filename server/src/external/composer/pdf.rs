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

use std::collections::BTreeMap;

use log::{debug, warn};
use lopdf::{
    content::{Content, Operation},
    dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat,
};

use super::{
    image::{decode, ColorSpace, ImageFilter, RasterImage},
    BlobStore, ComposeError, DocumentComposer, FieldStamp, ProtocolPage, StampContent,
};

const FONT: &str = "SignFlowF1";
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 595.0, 842.0];

/// Renders into the PDF itself: protocol pages are appended as A4 text
/// pages, stamps are drawn on top of the existing page content.
pub struct PdfComposer {
    pub font_size: f32,
    pub leading: f32,
    pub margin: f32,
}

impl Default for PdfComposer {
    fn default() -> Self {
        Self {
            font_size: 10.0,
            leading: 14.0,
            margin: 56.0,
        }
    }
}

impl DocumentComposer for PdfComposer {
    fn compose(
        &self,
        pdf: &[u8],
        protocol: &[ProtocolPage],
        stamps: &[FieldStamp],
        blobs: &dyn BlobStore,
    ) -> Result<Vec<u8>, ComposeError> {
        let mut doc =
            Document::load_mem(pdf).map_err(|err| ComposeError::InvalidDocument(err.to_string()))?;

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding"
        });

        self.draw_stamps(&mut doc, font_id, stamps, blobs)?;
        self.append_protocol(&mut doc, font_id, protocol)?;

        let mut ret = Vec::new();
        doc.save_to(&mut ret)
            .map_err(|err| ComposeError::Failed(err.to_string()))?;

        debug!(
            "Composed document with {} protocol page(s) and {} stamp(s)",
            protocol.len(),
            stamps.len()
        );

        Ok(ret)
    }
}

impl PdfComposer {
    fn draw_stamps(
        &self,
        doc: &mut Document,
        font_id: ObjectId,
        stamps: &[FieldStamp],
        blobs: &dyn BlobStore,
    ) -> Result<(), ComposeError> {
        let pages = doc.get_pages();
        let mut per_page: BTreeMap<ObjectId, Vec<Operation>> = BTreeMap::new();

        for (index, stamp) in stamps.iter().enumerate() {
            let page_id = match pages.get(&stamp.page) {
                Some(page_id) => *page_id,
                None => {
                    warn!(
                        "Field {} is placed on page {} which does not exist",
                        stamp.field_id, stamp.page
                    );

                    continue;
                }
            };

            let media_box = media_box(doc, page_id);
            let left = media_box[0] + stamp.x;
            let bottom = media_box[3] - stamp.y - stamp.height;

            let image = match &stamp.content {
                StampContent::Text(_) => None,
                StampContent::Image { storage_path, mime } => {
                    match decode(&blobs.load_bytes(storage_path)?) {
                        Ok(image) => Some(image),
                        Err(err) => {
                            warn!(
                                "Unable to draw {} image of field {}: {}",
                                mime, stamp.field_id, err
                            );

                            None
                        }
                    }
                }
            };

            let operations = per_page.entry(page_id).or_default();
            match (image, &stamp.content) {
                (Some(image), _) => {
                    let name = format!("SignFlowIm{}", index);
                    let (image_width, image_height) = (image.width as f32, image.height as f32);
                    let image_id = add_image(doc, image);
                    register_resource(doc, page_id, "XObject", &name, image_id)?;

                    let scale = (stamp.width / image_width).min(stamp.height / image_height);
                    let (width, height) = (image_width * scale, image_height * scale);
                    let x = left + (stamp.width - width) / 2.0;
                    let y = bottom + (stamp.height - height) / 2.0;

                    operations.push(Operation::new("q", vec![]));
                    operations.push(Operation::new(
                        "cm",
                        vec![
                            width.into(),
                            0.into(),
                            0.into(),
                            height.into(),
                            x.into(),
                            y.into(),
                        ],
                    ));
                    operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
                    operations.push(Operation::new("Q", vec![]));
                }
                (None, content) => {
                    let text = match content {
                        StampContent::Text(text) => text.as_str(),
                        StampContent::Image { .. } => "[signature image]",
                    };
                    let size = (stamp.height * 0.5).max(6.0).min(18.0);
                    let y = bottom + (stamp.height - size) / 2.0;

                    operations.push(Operation::new("BT", vec![]));
                    operations.push(Operation::new(
                        "Tf",
                        vec![Object::Name(FONT.into()), size.into()],
                    ));
                    operations.push(Operation::new("Td", vec![(left + 2.0).into(), y.into()]));
                    operations.push(Operation::new("Tj", vec![text_object(text)]));
                    operations.push(Operation::new("ET", vec![]));
                }
            }
        }

        for (page_id, operations) in per_page {
            register_resource(doc, page_id, "Font", FONT, font_id)?;

            let mut content = b"Q\n".to_vec();
            content.extend(Content { operations }.encode()?);
            append_content(doc, page_id, content)?;
        }

        Ok(())
    }

    fn append_protocol(
        &self,
        doc: &mut Document,
        font_id: ObjectId,
        protocol: &[ProtocolPage],
    ) -> Result<(), ComposeError> {
        if protocol.is_empty() {
            return Ok(());
        }

        let pages_id = pages_root(doc)?;
        let [_, _, width, height] = DEFAULT_MEDIA_BOX;

        let mut kids = Vec::new();
        for page in protocol {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![Object::Name(FONT.into()), self.font_size.into()],
                ),
                Operation::new("TL", vec![self.leading.into()]),
                Operation::new(
                    "Td",
                    vec![self.margin.into(), (height - self.margin).into()],
                ),
            ];
            for line in &page.lines {
                operations.push(Operation::new("Tj", vec![text_object(line)]));
                operations.push(Operation::new("T*", vec![]));
            }
            operations.push(Operation::new("ET", vec![]));

            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![Object::Name(FONT.into()), (self.font_size - 2.0).into()],
            ));
            operations.push(Operation::new(
                "Td",
                vec![self.margin.into(), (self.margin / 2.0).into()],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![text_object(&format!(
                    "Signature protocol page {} of {}",
                    page.number, page.total
                ))],
            ));
            operations.push(Operation::new("ET", vec![]));

            let content = Content { operations }.encode()?;
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! { FONT => font_id }
                },
                "Contents" => content_id
            });

            kids.push(Object::Reference(page_id));
        }

        let root = doc.get_object_mut(pages_id).and_then(Object::as_dict_mut)?;
        let count = root.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        let mut all_kids = root
            .get(b"Kids")
            .and_then(Object::as_array)
            .map(Clone::clone)
            .unwrap_or_default();

        let added = kids.len() as i64;
        all_kids.extend(kids);
        root.set("Kids", all_kids);
        root.set("Count", count + added);

        Ok(())
    }
}

fn pages_root(doc: &Document) -> Result<ObjectId, ComposeError> {
    let catalog_id = doc.trailer.get(b"Root").and_then(Object::as_reference)?;
    let pages_id = doc
        .get_object(catalog_id)
        .and_then(Object::as_dict)?
        .get(b"Pages")
        .and_then(Object::as_reference)?;

    Ok(pages_id)
}

/// Looks up a page attribute, following the page tree for inherited ones.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(id) = current {
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(object) = dict.get(key) {
            return match object {
                Object::Reference(id) => doc.get_object(*id).ok(),
                object => Some(object),
            };
        }

        depth += 1;
        if depth > 32 {
            return None;
        }

        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let values = match inherited(doc, page_id, b"MediaBox") {
        Some(Object::Array(values)) => values
            .iter()
            .filter_map(|value| match value {
                Object::Integer(v) => Some(*v as f32),
                Object::Real(v) => Some(*v as f32),
                _ => None,
            })
            .collect::<Vec<_>>(),
        _ => return DEFAULT_MEDIA_BOX,
    };

    match values.as_slice() {
        [x1, y1, x2, y2] => [*x1, *y1, *x2, *y2],
        _ => DEFAULT_MEDIA_BOX,
    }
}

fn resolve_dict(doc: &Document, object: &Object) -> Result<Dictionary, ComposeError> {
    match object {
        Object::Reference(id) => Ok(doc.get_object(*id).and_then(Object::as_dict)?.clone()),
        Object::Dictionary(dict) => Ok(dict.clone()),
        _ => Ok(Dictionary::new()),
    }
}

/// Adds a named entry to a resource category of the page. Inherited or
/// shared resources are copied onto the page first.
fn register_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    name: &str,
    id: ObjectId,
) -> Result<(), ComposeError> {
    let mut resources = match inherited(doc, page_id, b"Resources") {
        Some(object) => resolve_dict(doc, object)?,
        None => Dictionary::new(),
    };
    let mut entries = match resources.get(category.as_bytes()) {
        Ok(object) => resolve_dict(doc, object)?,
        Err(_) => Dictionary::new(),
    };

    entries.set(name, id);
    resources.set(category, entries);

    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)?
        .set("Resources", resources);

    Ok(())
}

/// Wraps the existing page content in `q`/`Q` and appends the new content,
/// which has to start with the closing `Q`.
fn append_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), ComposeError> {
    let existing = match doc.get_object(page_id).and_then(Object::as_dict)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    let mut contents = vec![Object::Reference(save_id)];
    contents.extend(existing);
    contents.push(Object::Reference(content_id));

    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)?
        .set("Contents", contents);

    Ok(())
}

fn add_image(doc: &mut Document, image: RasterImage) -> ObjectId {
    let RasterImage {
        width,
        height,
        color_space,
        filter,
        data,
        alpha,
    } = image;

    let filter = match filter {
        ImageFilter::Dct => "DCTDecode",
        ImageFilter::Flate => "FlateDecode",
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "BitsPerComponent" => 8,
        "Filter" => filter
    };

    let color_space: Object = match color_space {
        ColorSpace::Gray => "DeviceGray".into(),
        ColorSpace::Rgb => "DeviceRGB".into(),
        ColorSpace::Cmyk => "DeviceCMYK".into(),
        ColorSpace::Indexed(palette) => {
            let high = (palette.len() / 3).max(1) as i64 - 1;

            vec![
                "Indexed".into(),
                "DeviceRGB".into(),
                high.into(),
                Object::String(palette, StringFormat::Hexadecimal),
            ]
            .into()
        }
    };
    dict.set("ColorSpace", color_space);

    if let Some(alpha) = alpha {
        let mask_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "BitsPerComponent" => 8,
                "ColorSpace" => "DeviceGray",
                "Filter" => "FlateDecode"
            },
            alpha,
        ));

        dict.set("SMask", mask_id);
    }

    doc.add_object(Stream::new(dict, data))
}

/// Literal string in the font's WinAnsi encoding.
fn text_object(text: &str) -> Object {
    let bytes = text
        .chars()
        .map(|c| match c as u32 {
            v @ 0x20..=0x7E | v @ 0xA0..=0xFF => v as u8,
            _ => b'?',
        })
        .collect::<Vec<_>>();

    Object::String(bytes, StringFormat::Literal)
}
