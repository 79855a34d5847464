// Licensed under the Apache-2.0 license

//! CX2070x firmware patch image format.
//!
//! A patch image is a 60-byte big-endian header followed by three record
//! segments (loader, CPX, SPX). Each segment is a packed sequence of memory
//! records; a record carries a length word, a target address and the payload
//! bytes for that address. The header stores each segment as a byte offset
//! into the image plus a byte length, with zero length meaning the segment
//! is absent.

use log::warn;
use std::fmt;
use std::ops::Range;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub mod manifest;
pub use manifest::PatchManifest;

/// Size of the fixed header preceding the record segments.
pub const PATCH_HEADER_LEN: usize = 60;
/// Offset within the description of the patch marker byte.
pub const PATCH_MARKER_OFFSET: usize = 0xd;
/// Description byte identifying an image that carries a DSP patch.
pub const PATCH_MARKER: u8 = b'P';
/// Description used by [`PatchBuilder`] unless one is supplied. The marker
/// byte lands at [`PATCH_MARKER_OFFSET`].
pub const DEFAULT_DESCRIPTION: &str = "CX2070X DSP  PATCH";

const EOF_MARKER: u8 = 0x1a;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PatchHeader {
    pub desc: [u8; 24],
    pub open_bracket: u8,
    pub version: [u8; 5],
    pub close_bracket: u8,
    pub eof: u8,
    pub file_len: U32<BigEndian>,
    pub loader_offset: U32<BigEndian>,
    pub loader_len: U32<BigEndian>,
    pub cpx_offset: U32<BigEndian>,
    pub cpx_len: U32<BigEndian>,
    pub spx_offset: U32<BigEndian>,
    pub spx_len: U32<BigEndian>,
}

/// The three record segments of a patch image, in download order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Loader,
    Cpx,
    Spx,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 3] = [SegmentKind::Loader, SegmentKind::Cpx, SegmentKind::Spx];

    fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Loader => "loader",
            SegmentKind::Cpx => "cpx",
            SegmentKind::Spx => "spx",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Image shorter than the fixed header.
    Truncated { len: usize },
    /// A segment window lies outside the image.
    SegmentBounds {
        segment: SegmentKind,
        offset: u32,
        len: u32,
    },
    /// A record length word is too small to hold the address word.
    RecordLength {
        segment: SegmentKind,
        offset: usize,
        len: u32,
    },
    /// A record crosses the end of its segment.
    RecordBounds { segment: SegmentKind, offset: usize },
    /// A loader record addresses a register outside the device register file.
    LoaderAddress { addr: u32 },
    /// The description does not carry the patch marker.
    NotAPatch,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImageError::Truncated { len } => {
                write!(
                    f,
                    "image is {} bytes, shorter than the {}-byte header",
                    len, PATCH_HEADER_LEN
                )
            }
            ImageError::SegmentBounds {
                segment,
                offset,
                len,
            } => {
                write!(
                    f,
                    "{} segment at offset {:#x} with length {:#x} exceeds the image",
                    segment, offset, len
                )
            }
            ImageError::RecordLength {
                segment,
                offset,
                len,
            } => {
                write!(
                    f,
                    "{} record at segment offset {:#x} has invalid length {}",
                    segment, offset, len
                )
            }
            ImageError::RecordBounds { segment, offset } => {
                write!(
                    f,
                    "{} record at segment offset {:#x} crosses the segment end",
                    segment, offset
                )
            }
            ImageError::LoaderAddress { addr } => {
                write!(
                    f,
                    "loader record address {:#x} is outside the register file",
                    addr
                )
            }
            ImageError::NotAPatch => {
                write!(f, "image description carries no DSP patch marker")
            }
        }
    }
}

impl std::error::Error for ImageError {}

/// A validated view of a patch image. Parsing checks that every segment
/// window fits inside the image; record contents are checked lazily while
/// iterating.
#[derive(Debug)]
pub struct PatchImage<'a> {
    header: &'a PatchHeader,
    data: &'a [u8],
    loader: Range<usize>,
    cpx: Range<usize>,
    spx: Range<usize>,
}

impl<'a> PatchImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<PatchImage<'a>, ImageError> {
        let (header, _) = PatchHeader::ref_from_prefix(data)
            .map_err(|_| ImageError::Truncated { len: data.len() })?;
        let loader = segment_range(
            data,
            SegmentKind::Loader,
            header.loader_offset.get(),
            header.loader_len.get(),
        )?;
        let cpx = segment_range(
            data,
            SegmentKind::Cpx,
            header.cpx_offset.get(),
            header.cpx_len.get(),
        )?;
        let spx = segment_range(
            data,
            SegmentKind::Spx,
            header.spx_offset.get(),
            header.spx_len.get(),
        )?;
        if header.file_len.get() as usize != data.len() {
            // The header field is informational; devices download records,
            // not the file, so a mismatch is not fatal.
            warn!(
                "patch header claims {} bytes but the image is {} bytes",
                header.file_len.get(),
                data.len()
            );
        }
        Ok(PatchImage {
            header,
            data,
            loader,
            cpx,
            spx,
        })
    }

    pub fn header(&self) -> &PatchHeader {
        self.header
    }

    /// Whether the image carries a DSP patch. Only patch images may be
    /// downloaded to the device.
    pub fn is_patch(&self) -> bool {
        self.header.desc[PATCH_MARKER_OFFSET] == PATCH_MARKER
    }

    pub fn description(&self) -> String {
        let end = self
            .header
            .desc
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.header.desc.len());
        String::from_utf8_lossy(&self.header.desc[..end]).into_owned()
    }

    pub fn version(&self) -> &[u8; 5] {
        &self.header.version
    }

    pub fn version_string(&self) -> String {
        String::from_utf8_lossy(&self.header.version).into_owned()
    }

    fn segment(&self, kind: SegmentKind) -> Range<usize> {
        match kind {
            SegmentKind::Loader => self.loader.clone(),
            SegmentKind::Cpx => self.cpx.clone(),
            SegmentKind::Spx => self.spx.clone(),
        }
    }

    /// Byte length of a segment; zero when the segment is absent.
    pub fn segment_len(&self, kind: SegmentKind) -> usize {
        self.segment(kind).len()
    }

    /// Iterate the memory records of one segment.
    pub fn records(&self, kind: SegmentKind) -> SegmentRecords<'a> {
        SegmentRecords {
            segment: kind,
            data: &self.data[self.segment(kind)],
            cursor: 0,
            failed: false,
        }
    }
}

fn segment_range(
    data: &[u8],
    segment: SegmentKind,
    offset: u32,
    len: u32,
) -> Result<Range<usize>, ImageError> {
    if len == 0 {
        return Ok(0..0);
    }
    let start = offset as usize;
    let end = start.checked_add(len as usize);
    match end {
        Some(end) if end <= data.len() => Ok(start..end),
        _ => Err(ImageError::SegmentBounds {
            segment,
            offset,
            len,
        }),
    }
}

/// A memory record: the payload bytes to download to one target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRecord<'a> {
    pub addr: u32,
    pub data: &'a [u8],
}

/// Cursor over the packed records of one segment. The length word of a
/// record counts the address word plus the payload, so the next record
/// starts `len + 4` bytes further on. Iteration ends exactly at the segment
/// end; a record that does not fit is an error and ends the iteration.
pub struct SegmentRecords<'a> {
    segment: SegmentKind,
    data: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> Iterator for SegmentRecords<'a> {
    type Item = Result<MemoryRecord<'a>, ImageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.data.len() {
            return None;
        }
        let offset = self.cursor;
        let rest = &self.data[offset..];
        if rest.len() < 8 {
            self.failed = true;
            return Some(Err(ImageError::RecordBounds {
                segment: self.segment,
                offset,
            }));
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if len < 4 {
            self.failed = true;
            return Some(Err(ImageError::RecordLength {
                segment: self.segment,
                offset,
                len,
            }));
        }
        let total = 4 + len as usize;
        if total > rest.len() {
            self.failed = true;
            return Some(Err(ImageError::RecordBounds {
                segment: self.segment,
                offset,
            }));
        }
        let addr = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
        self.cursor = offset + total;
        Some(Ok(MemoryRecord {
            addr,
            data: &rest[8..total],
        }))
    }
}

/// Assembles a wire-exact patch image from per-segment records.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    desc: [u8; 24],
    version: [u8; 5],
    loader: Vec<u8>,
    cpx: Vec<u8>,
    spx: Vec<u8>,
}

impl Default for PatchBuilder {
    fn default() -> Self {
        let mut builder = PatchBuilder {
            desc: [0; 24],
            version: *b"00000",
            loader: Vec::new(),
            cpx: Vec::new(),
            spx: Vec::new(),
        };
        builder.set_description(DEFAULT_DESCRIPTION);
        builder
    }
}

impl PatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_description(&mut self, desc: &str) {
        self.desc = [0; 24];
        let bytes = desc.as_bytes();
        let n = bytes.len().min(self.desc.len());
        self.desc[..n].copy_from_slice(&bytes[..n]);
    }

    /// Sets the 24-byte description, truncating longer input. Byte
    /// [`PATCH_MARKER_OFFSET`] decides whether the image counts as a patch.
    pub fn description(mut self, desc: &str) -> Self {
        self.set_description(desc);
        self
    }

    pub fn version(mut self, version: [u8; 5]) -> Self {
        self.version = version;
        self
    }

    /// Appends one memory record to a segment.
    pub fn record(mut self, segment: SegmentKind, addr: u32, data: &[u8]) -> Self {
        let buf = match segment {
            SegmentKind::Loader => &mut self.loader,
            SegmentKind::Cpx => &mut self.cpx,
            SegmentKind::Spx => &mut self.spx,
        };
        buf.extend_from_slice(&(data.len() as u32 + 4).to_be_bytes());
        buf.extend_from_slice(&addr.to_be_bytes());
        buf.extend_from_slice(data);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let file_len = PATCH_HEADER_LEN + self.loader.len() + self.cpx.len() + self.spx.len();
        let loader_offset = PATCH_HEADER_LEN;
        let cpx_offset = loader_offset + self.loader.len();
        let spx_offset = cpx_offset + self.cpx.len();
        let header = PatchHeader {
            desc: self.desc,
            open_bracket: b'[',
            version: self.version,
            close_bracket: b']',
            eof: EOF_MARKER,
            file_len: U32::new(file_len as u32),
            loader_offset: U32::new(segment_offset(loader_offset, &self.loader)),
            loader_len: U32::new(self.loader.len() as u32),
            cpx_offset: U32::new(segment_offset(cpx_offset, &self.cpx)),
            cpx_len: U32::new(self.cpx.len() as u32),
            spx_offset: U32::new(segment_offset(spx_offset, &self.spx)),
            spx_len: U32::new(self.spx.len() as u32),
        };
        let mut image = Vec::with_capacity(file_len);
        image.extend_from_slice(header.as_bytes());
        image.extend_from_slice(&self.loader);
        image.extend_from_slice(&self.cpx);
        image.extend_from_slice(&self.spx);
        image
    }
}

fn segment_offset(offset: usize, segment: &[u8]) -> u32 {
    if segment.is_empty() {
        0
    } else {
        offset as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Vec<u8> {
        PatchBuilder::new()
            .version(*b"05A19")
            .record(SegmentKind::Loader, 0x117e, &[0x01, 0x02])
            .record(SegmentKind::Cpx, 0x0002_8000, &[0xaa; 16])
            .record(SegmentKind::Cpx, 0x0002_9000, &[0xbb; 8])
            .record(SegmentKind::Spx, 0x8004_0000, &[0xcc; 4])
            .build()
    }

    #[test]
    fn test_header_layout_is_wire_exact() {
        assert_eq!(
            core::mem::size_of::<PatchHeader>(),
            PATCH_HEADER_LEN,
            "header struct must match the on-disk layout"
        );
        let image = sample_image();
        assert_eq!(image[24], b'[');
        assert_eq!(&image[25..30], b"05A19");
        assert_eq!(image[30], b']');
        assert_eq!(
            u32::from_be_bytes([image[32], image[33], image[34], image[35]]) as usize,
            image.len()
        );
    }

    #[test]
    fn test_build_then_parse_round_trip() {
        let image = sample_image();
        let parsed = PatchImage::parse(&image).expect("built image must parse");
        assert!(parsed.is_patch());
        assert_eq!(parsed.description(), DEFAULT_DESCRIPTION);
        assert_eq!(parsed.version_string(), "05A19");

        let loader: Vec<_> = parsed
            .records(SegmentKind::Loader)
            .collect::<Result<_, _>>()
            .expect("loader records must be well formed");
        assert_eq!(loader.len(), 1);
        assert_eq!(loader[0].addr, 0x117e);
        assert_eq!(loader[0].data, &[0x01, 0x02]);

        let cpx: Vec<_> = parsed
            .records(SegmentKind::Cpx)
            .collect::<Result<_, _>>()
            .expect("cpx records must be well formed");
        assert_eq!(cpx.len(), 2);
        assert_eq!(cpx[0].addr, 0x0002_8000);
        assert_eq!(cpx[0].data, &[0xaa; 16]);
        assert_eq!(cpx[1].addr, 0x0002_9000);

        let spx: Vec<_> = parsed
            .records(SegmentKind::Spx)
            .collect::<Result<_, _>>()
            .expect("spx records must be well formed");
        assert_eq!(spx.len(), 1);
        assert_eq!(spx[0].addr, 0x8004_0000);
    }

    #[test]
    fn test_empty_segments_have_no_records() {
        let image = PatchBuilder::new()
            .record(SegmentKind::Cpx, 0x1000, &[0x42])
            .build();
        let parsed = PatchImage::parse(&image).expect("image must parse");
        assert_eq!(parsed.segment_len(SegmentKind::Loader), 0);
        assert_eq!(parsed.records(SegmentKind::Loader).count(), 0);
        assert_eq!(parsed.segment_len(SegmentKind::Spx), 0);
        assert_eq!(parsed.records(SegmentKind::Spx).count(), 0);
        assert_eq!(parsed.records(SegmentKind::Cpx).count(), 1);
    }

    #[test]
    fn test_truncated_image_rejected() {
        let image = sample_image();
        let err = PatchImage::parse(&image[..30]).expect_err("short image must not parse");
        assert_eq!(err, ImageError::Truncated { len: 30 });
    }

    #[test]
    fn test_segment_window_outside_image_rejected() {
        let mut image = sample_image();
        // Inflate the cpx segment length field past the end of the file.
        image[48..52].copy_from_slice(&0x10_0000u32.to_be_bytes());
        let err = PatchImage::parse(&image).expect_err("oversized segment must not parse");
        assert!(
            matches!(
                err,
                ImageError::SegmentBounds {
                    segment: SegmentKind::Cpx,
                    ..
                }
            ),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_record_length_below_address_word_rejected() {
        let mut image = PatchBuilder::new()
            .record(SegmentKind::Loader, 0x1000, &[0u8; 4])
            .build();
        // The first loader record starts right after the header.
        image[PATCH_HEADER_LEN..PATCH_HEADER_LEN + 4].copy_from_slice(&3u32.to_be_bytes());
        let parsed = PatchImage::parse(&image).expect("segment windows are still valid");
        let err = parsed
            .records(SegmentKind::Loader)
            .next()
            .expect("cursor must yield the bad record")
            .expect_err("undersized length must be rejected");
        assert_eq!(
            err,
            ImageError::RecordLength {
                segment: SegmentKind::Loader,
                offset: 0,
                len: 3
            }
        );
    }

    #[test]
    fn test_record_crossing_segment_end_rejected() {
        let mut image = PatchBuilder::new()
            .record(SegmentKind::Spx, 0x2000, &[0u8; 8])
            .build();
        // Claim more payload than the segment holds.
        image[PATCH_HEADER_LEN..PATCH_HEADER_LEN + 4].copy_from_slice(&64u32.to_be_bytes());
        let parsed = PatchImage::parse(&image).expect("segment windows are still valid");
        let mut records = parsed.records(SegmentKind::Spx);
        let err = records
            .next()
            .expect("cursor must yield the bad record")
            .expect_err("overrunning record must be rejected");
        assert_eq!(
            err,
            ImageError::RecordBounds {
                segment: SegmentKind::Spx,
                offset: 0
            }
        );
        assert!(
            records.next().is_none(),
            "iteration must end after an error"
        );
    }

    #[test]
    fn test_iteration_ends_exactly_at_segment_end() {
        let image = PatchBuilder::new()
            .record(SegmentKind::Cpx, 0x10, &[1, 2, 3])
            .record(SegmentKind::Cpx, 0x20, &[4])
            .build();
        let parsed = PatchImage::parse(&image).expect("image must parse");
        let records: Vec<_> = parsed
            .records(SegmentKind::Cpx)
            .collect::<Result<_, _>>()
            .expect("records must be well formed");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].data, &[4]);
    }

    #[test]
    fn test_marker_byte_decides_patch_status() {
        let image = PatchBuilder::new()
            .description("CX2070X RAM DUMP")
            .build();
        let parsed = PatchImage::parse(&image).expect("image must parse");
        assert!(!parsed.is_patch(), "dump images must not count as patches");
    }
}
