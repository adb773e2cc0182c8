//! Scan and splice JPEG application (APPn) segments.
//!
//! DJI R-JPEGs keep their radiometric calibration in
//! vendor APPn segments (APP3, APP4, ...) next to the usual
//! EXIF/XMP APP1 blocks. A freshly encoded JPEG only
//! carries APP0 (JFIF) and whatever APP1 segments the
//! encoder was asked to write, so the remaining segments
//! have to be transplanted byte-for-byte.
//!
//! # Layout
//!
//! - 0x0: `FF D8` start of image
//! - then repeated: `FF xx` marker, `u16` big endian length
//!   (including the two length bytes), payload
//! - `FF DA` start of scan ends the header section
use std::io::{Cursor, Read, Seek, SeekFrom};

use anyhow::{Context, Result};
use byteordered::ByteOrdered;

use crate::{error::Error, parse::Parseable};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const SOS: u8 = 0xDA;
pub const APP0: u8 = 0xE0;
pub const APP1: u8 = 0xE1;
pub const APP15: u8 = 0xEF;

declare_parseable_struct! {
    struct SegmentHeader {
        lead => u8,
        marker => u8,
        length => u16,
    }
}

/// Whether payload bytes are copied while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Record offsets and copy every APPn segment.
    Full,
    /// Record offsets only; payloads are skipped by seeking.
    PositionsOnly,
}

/// One APPn segment. `start` is the offset of the `FF`
/// marker byte, `end` the offset right after the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSegment {
    pub marker: u8,
    pub start: u64,
    pub end: u64,
    /// Complete segment (marker, length and payload).
    /// `None` when scanned with [`ScanMode::PositionsOnly`].
    pub bytes: Option<Vec<u8>>,
}

impl AppSegment {
    /// Payload without marker and length.
    pub fn contents(&self) -> Option<&[u8]> {
        self.bytes.as_deref().map(|b| &b[4..])
    }

    pub fn is_app(marker: u8) -> bool {
        (APP0..=APP15).contains(&marker)
    }
}

/// Result of scanning a JPEG up to its first scan.
#[derive(Debug, Clone, Default)]
pub struct AppSegments {
    segments: Vec<AppSegment>,
    sos: Option<u64>,
    end: u64,
}

impl AppSegments {
    /// Scan a JPEG stream from its beginning.
    ///
    /// Fails with [`Error::Format`] when the stream does not
    /// start with the SOI marker or a segment header is
    /// malformed. Running out of data before SOS is not an
    /// error; scanning simply stops.
    pub fn scan<R: Read + Seek>(mut rdr: R, mode: ScanMode) -> Result<Self> {
        rdr.seek(SeekFrom::Start(0))?;
        let mut soi = [0u8; 2];
        if rdr.read_exact(&mut soi).is_err() || soi != SOI {
            return Err(Error::format("missing JPEG start-of-image marker").into());
        }

        let mut out = AppSegments::default();
        let mut pos = 2u64;
        loop {
            let mut header = [0u8; 4];
            match read_full(&mut rdr, &mut header)? {
                4 => {}
                _ => break,
            }
            let hdr = SegmentHeader::parse(&mut ByteOrdered::be(&header[..]))?;
            if hdr.lead != 0xFF {
                return Err(Error::format(format!(
                    "expected segment marker at offset {}, found {:#04x}",
                    pos, hdr.lead
                ))
                .into());
            }
            if hdr.marker == SOS {
                out.sos = Some(pos);
                break;
            }
            if hdr.length < 2 {
                return Err(Error::format(format!(
                    "segment {:#04x} at offset {} has invalid length {}",
                    hdr.marker, pos, hdr.length
                ))
                .into());
            }

            let payload_len = hdr.length as u64 - 2;
            let end = pos + 4 + payload_len;
            let keep = AppSegment::is_app(hdr.marker);
            let bytes = if keep && mode == ScanMode::Full {
                let mut bytes = Vec::with_capacity(4 + payload_len as usize);
                bytes.extend_from_slice(&header);
                bytes.resize(4 + payload_len as usize, 0);
                rdr.read_exact(&mut bytes[4..]).with_context(|| {
                    format!("truncated APP{} segment at offset {}", hdr.marker & 0xF, pos)
                })?;
                Some(bytes)
            } else {
                rdr.seek(SeekFrom::Start(end))?;
                None
            };

            if keep {
                out.segments.push(AppSegment {
                    marker: hdr.marker,
                    start: pos,
                    end,
                    bytes,
                });
            }
            pos = end;
        }
        out.end = pos;
        Ok(out)
    }

    pub fn scan_bytes(bytes: &[u8], mode: ScanMode) -> Result<Self> {
        Self::scan(Cursor::new(bytes), mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppSegment> {
        self.segments.iter()
    }

    pub fn by_marker(&self, marker: u8) -> impl Iterator<Item = &AppSegment> {
        self.segments.iter().filter(move |s| s.marker == marker)
    }

    /// Offsets of the last segment of the given class.
    pub fn position(&self, marker: u8) -> Option<(u64, u64)> {
        self.by_marker(marker).last().map(|s| (s.start, s.end))
    }

    /// Offset of the SOS marker, if the scan got that far.
    pub fn start_of_scan(&self) -> Option<u64> {
        self.sos
    }

    /// Where transplanted segments go: after the last APP1,
    /// else after the last APP0, else right before SOS.
    pub fn insertion_point(&self) -> u64 {
        self.position(APP1)
            .or_else(|| self.position(APP0))
            .map(|(_, end)| end)
            .or(self.sos)
            .unwrap_or(self.end)
    }

    /// Segments worth transplanting into a fresh encode:
    /// everything except APP0/APP1, grouped by class in order
    /// of first appearance, file order within a class.
    pub fn retained(&self) -> Vec<&AppSegment> {
        let mut order: Vec<u8> = vec![];
        for seg in &self.segments {
            if seg.marker & 0xF > 1 && !order.contains(&seg.marker) {
                order.push(seg.marker);
            }
        }
        order
            .into_iter()
            .flat_map(|m| self.by_marker(m))
            .collect()
    }

    /// First APP1 payload starting with `signature`.
    pub fn app1_with_signature(&self, signature: &[u8]) -> Option<&[u8]> {
        self.by_marker(APP1)
            .filter_map(|s| s.contents())
            .find(|c| c.starts_with(signature))
    }
}

/// Insert `retained` segments into a freshly encoded JPEG
/// at its [insertion point](AppSegments::insertion_point).
pub fn splice(encoded: &[u8], retained: &[&AppSegment]) -> Result<Vec<u8>> {
    let positions = AppSegments::scan_bytes(encoded, ScanMode::PositionsOnly)
        .context("re-scanning encoded JPEG")?;
    let boundary = positions.insertion_point() as usize;

    let extra: usize = retained
        .iter()
        .map(|s| s.bytes.as_ref().map_or(0, Vec::len))
        .sum();
    let mut out = Vec::with_capacity(encoded.len() + extra);
    out.extend_from_slice(&encoded[..boundary]);
    for seg in retained {
        let bytes = seg
            .bytes
            .as_ref()
            .ok_or_else(|| Error::encoding("segment scanned without payload"))?;
        out.extend_from_slice(bytes);
    }
    out.extend_from_slice(&encoded[boundary..]);
    Ok(out)
}

/// Like `read_exact`, but reports how much was read
/// instead of failing on a short read.
fn read_full<R: Read>(rdr: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match rdr.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
