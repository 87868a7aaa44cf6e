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

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use super::ComposeError;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Raster data ready to be embedded as an image XObject.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub filter: ImageFilter,
    pub data: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed(Vec<u8>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageFilter {
    Dct,
    Flate,
}

pub fn decode(data: &[u8]) -> Result<RasterImage, ComposeError> {
    if data.starts_with(PNG_SIGNATURE) {
        decode_png(data)
    } else if data.starts_with(&[0xFF, 0xD8]) {
        decode_jpeg(data)
    } else {
        Err(unsupported("neither PNG nor JPEG"))
    }
}

/* JPEG */

/// JPEG data is embedded as is, only the frame header is read.
fn decode_jpeg(data: &[u8]) -> Result<RasterImage, ComposeError> {
    let mut pos = 2;

    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return Err(unsupported("corrupt JPEG marker"));
        }

        let marker = data[pos + 1];
        match marker {
            0xFF => {
                pos += 1;

                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                pos += 2;

                continue;
            }
            0xD9 | 0xDA => break,
            _ => (),
        }

        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            let frame = data
                .get(pos + 4..pos + 10)
                .ok_or_else(|| unsupported("truncated JPEG frame header"))?;
            let height = u16::from_be_bytes([frame[1], frame[2]]) as u32;
            let width = u16::from_be_bytes([frame[3], frame[4]]) as u32;
            let color_space = match frame[5] {
                1 => ColorSpace::Gray,
                3 => ColorSpace::Rgb,
                4 => ColorSpace::Cmyk,
                n => return Err(unsupported(&format!("JPEG with {} components", n))),
            };

            if width == 0 || height == 0 {
                return Err(unsupported("JPEG without dimensions"));
            }

            return Ok(RasterImage {
                width,
                height,
                color_space,
                filter: ImageFilter::Dct,
                data: data.to_vec(),
                alpha: None,
            });
        }

        pos += 2 + length;
    }

    Err(unsupported("JPEG frame header not found"))
}

/* PNG */

struct Header {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: u8,
    interlace: u8,
}

/// Supports non interlaced 8 bit images. Alpha is split into a soft mask.
fn decode_png(data: &[u8]) -> Result<RasterImage, ComposeError> {
    let mut header = None;
    let mut palette = Vec::new();
    let mut compressed = Vec::new();

    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= data.len() {
        let length =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let kind = &data[pos + 4..pos + 8];
        let chunk = data
            .get(pos + 8..pos + 8 + length)
            .ok_or_else(|| unsupported("truncated PNG chunk"))?;

        match kind {
            b"IHDR" if chunk.len() >= 13 => {
                header = Some(Header {
                    width: u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    height: u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
                    bit_depth: chunk[8],
                    color_type: chunk[9],
                    interlace: chunk[12],
                })
            }
            b"PLTE" => palette = chunk.to_vec(),
            b"IDAT" => compressed.extend_from_slice(chunk),
            b"IEND" => break,
            _ => (),
        }

        pos += 12 + length;
    }

    let header = header.ok_or_else(|| unsupported("PNG header missing"))?;
    if header.bit_depth != 8 || header.interlace != 0 {
        return Err(unsupported("only non interlaced 8 bit PNG images are supported"));
    }
    if header.width == 0 || header.height == 0 {
        return Err(unsupported("PNG without dimensions"));
    }

    let (channels, color_space) = match header.color_type {
        0 => (1, ColorSpace::Gray),
        2 => (3, ColorSpace::Rgb),
        3 if !palette.is_empty() => (1, ColorSpace::Indexed(palette)),
        4 => (2, ColorSpace::Gray),
        6 => (4, ColorSpace::Rgb),
        n => return Err(unsupported(&format!("PNG color type {}", n))),
    };

    let mut raw = Vec::new();
    ZlibDecoder::new(&compressed[..])
        .read_to_end(&mut raw)
        .map_err(|err| unsupported(&format!("PNG data: {}", err)))?;

    let width = header.width as usize;
    let height = header.height as usize;
    let pixels = unfilter(&raw, width, height, channels)?;

    let (color, alpha) = match channels {
        2 | 4 => {
            let color_channels = channels - 1;
            let mut color = Vec::with_capacity(width * height * color_channels);
            let mut alpha = Vec::with_capacity(width * height);
            for pixel in pixels.chunks(channels) {
                color.extend_from_slice(&pixel[..color_channels]);
                alpha.push(pixel[color_channels]);
            }

            (color, Some(alpha))
        }
        _ => (pixels, None),
    };

    Ok(RasterImage {
        width: header.width,
        height: header.height,
        color_space,
        filter: ImageFilter::Flate,
        data: deflate(&color)?,
        alpha: match alpha {
            Some(alpha) => Some(deflate(&alpha)?),
            None => None,
        },
    })
}

/// Reverses the per row PNG filters.
fn unfilter(raw: &[u8], width: usize, height: usize, bpp: usize) -> Result<Vec<u8>, ComposeError> {
    let stride = width * bpp;
    if raw.len() < height * (stride + 1) {
        return Err(unsupported("truncated PNG image data"));
    }

    let mut ret = vec![0u8; height * stride];
    for row in 0..height {
        let start = row * (stride + 1);
        let filter = raw[start];
        let line = &raw[start + 1..start + 1 + stride];

        let (done, rest) = ret.split_at_mut(row * stride);
        let prior = if row == 0 {
            None
        } else {
            Some(&done[(row - 1) * stride..])
        };
        let current = &mut rest[..stride];

        for i in 0..stride {
            let a = if i >= bpp { current[i - bpp] } else { 0 };
            let b = prior.map_or(0, |p| p[i]);
            let c = if i >= bpp {
                prior.map_or(0, |p| p[i - bpp])
            } else {
                0
            };

            current[i] = match filter {
                0 => line[i],
                1 => line[i].wrapping_add(a),
                2 => line[i].wrapping_add(b),
                3 => line[i].wrapping_add(((a as u16 + b as u16) / 2) as u8),
                4 => line[i].wrapping_add(paeth(a, b, c)),
                n => return Err(unsupported(&format!("PNG filter {}", n))),
            };
        }
    }

    Ok(ret)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ComposeError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|err| ComposeError::Failed(format!("Unable to compress image: {}", err)))
}

fn unsupported(reason: &str) -> ComposeError {
    ComposeError::UnsupportedImage(reason.into())
}
