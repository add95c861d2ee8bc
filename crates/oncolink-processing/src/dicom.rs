//! Bounded structural parse of DICOM Part 10 headers.
//!
//! Walks the file meta group (always explicit VR little endian) and then the dataset in the
//! transfer syntax it declares, recording short textual elements at the top level. Sequences
//! are traversed but not recorded. Parsing stops at Pixel Data.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::sniff::DICM_OFFSET;

/// Maximum number of bytes read for the structural parse.
pub const DICOM_HEADER_READ_LIMIT: usize = 2 * 1024 * 1024;

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_SEQUENCE_DEPTH: usize = 16;
const MAX_TEXT_VALUE: usize = 4096;

const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
    pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag::new(0x0002, 0x0003);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);
    const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
    const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
    const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);

    /// Odd groups hold private (vendor) data elements.
    pub fn is_private(&self) -> bool {
        self.group % 2 == 1
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

impl FromStr for Tag {
    type Err = String;

    /// Accepts `(0010,0010)`, `0010,0010`, or `00100010`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .chars()
            .filter(|c| !matches!(c, '(' | ')' | ',' | ' '))
            .collect();
        if cleaned.len() != 8 || !cleaned.is_ascii() {
            return Err(format!("invalid DICOM tag: {}", s));
        }
        let group = u16::from_str_radix(&cleaned[..4], 16).map_err(|e| e.to_string())?;
        let element = u16::from_str_radix(&cleaned[4..], 16).map_err(|e| e.to_string())?;
        Ok(Tag::new(group, element))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DicomError {
    #[error("missing DICM marker at offset 128")]
    MissingMarker,

    #[error("truncated element at offset {0}")]
    Truncated(usize),

    #[error("invalid value representation at offset {0}")]
    InvalidVr(usize),

    #[error("unexpected delimiter at offset {0}")]
    UnexpectedDelimiter(usize),

    #[error("missing transfer syntax UID")]
    MissingTransferSyntax,

    #[error("unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("sequence nesting deeper than {MAX_SEQUENCE_DEPTH}")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomElement {
    pub vr: String,
    pub value: String,
}

/// Parsed header: file meta and top-level textual elements.
#[derive(Debug, Clone, Default)]
pub struct DicomHeader {
    pub transfer_syntax: String,
    pub elements: BTreeMap<Tag, DicomElement>,
    pub reached_pixel_data: bool,
}

impl DicomHeader {
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.elements.get(&tag).map(|e| e.value.as_str())
    }

    pub fn study_instance_uid(&self) -> Option<&str> {
        self.get(Tag::STUDY_INSTANCE_UID)
    }

    pub fn series_instance_uid(&self) -> Option<&str> {
        self.get(Tag::SERIES_INSTANCE_UID)
    }

    pub fn sop_instance_uid(&self) -> Option<&str> {
        self.get(Tag::SOP_INSTANCE_UID)
            .or_else(|| self.get(Tag::MEDIA_STORAGE_SOP_INSTANCE_UID))
    }

    pub fn modality(&self) -> Option<&str> {
        self.get(Tag::MODALITY)
    }

    pub fn remove(&mut self, tag: Tag) -> Option<DicomElement> {
        self.elements.remove(&tag)
    }

    /// Replace the value of an element if present.
    pub fn replace(&mut self, tag: Tag, value: &str) {
        if let Some(element) = self.elements.get_mut(&tag) {
            element.value = value.to_string();
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Tag) -> bool) {
        self.elements.retain(|tag, _| keep(tag));
    }

    /// JSON form persisted as the imaging metadata artifact.
    pub fn to_metadata_json(&self) -> serde_json::Value {
        let elements: serde_json::Map<String, serde_json::Value> = self
            .elements
            .iter()
            .map(|(tag, element)| {
                (
                    tag.to_string(),
                    serde_json::json!({ "vr": element.vr, "value": element.value }),
                )
            })
            .collect();

        serde_json::json!({
            "transfer_syntax": self.transfer_syntax,
            "study_instance_uid": self.study_instance_uid(),
            "series_instance_uid": self.series_instance_uid(),
            "sop_instance_uid": self.sop_instance_uid(),
            "modality": self.modality(),
            "elements": elements,
        })
    }
}

/// Parse a DICOM header from `data`.
///
/// `truncated` says `data` is a capped prefix of a longer file; running out of bytes then
/// ends the parse instead of failing it.
pub fn parse_dicom(data: &[u8], truncated: bool) -> Result<DicomHeader, DicomError> {
    if data.len() < DICM_OFFSET + 4 || &data[DICM_OFFSET..DICM_OFFSET + 4] != b"DICM" {
        return Err(DicomError::MissingMarker);
    }

    let mut reader = Reader {
        data,
        pos: DICM_OFFSET + 4,
        truncated,
    };
    let mut header = DicomHeader::default();

    // File meta information group
    while reader.peek_u16() == Some(0x0002) {
        let start = reader.pos;
        let Some(element) = read_element_header(&mut reader, true)? else {
            return Err(DicomError::Truncated(start));
        };
        let Some(value) = reader.bytes(element.length as usize) else {
            return Err(DicomError::Truncated(start));
        };
        record(&mut header, &element, value);
    }

    header.transfer_syntax = header
        .get(Tag::TRANSFER_SYNTAX_UID)
        .ok_or(DicomError::MissingTransferSyntax)?
        .to_string();

    let explicit = match header.transfer_syntax.as_str() {
        IMPLICIT_VR_LITTLE_ENDIAN => false,
        EXPLICIT_VR_BIG_ENDIAN | DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => {
            return Err(DicomError::UnsupportedTransferSyntax(
                header.transfer_syntax.clone(),
            ));
        }
        // Every other syntax (including encapsulated pixel data) is explicit VR little endian.
        _ => true,
    };

    walk_elements(&mut reader, explicit, Some(&mut header), 0, false)?;
    Ok(header)
}

enum Flow {
    Continue,
    Halt,
}

struct RawElement {
    tag: Tag,
    vr: [u8; 2],
    length: u32,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    truncated: bool,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn peek_u16(&self) -> Option<u16> {
        let bytes = self.data.get(self.pos..self.pos + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Outcome of running out of bytes at `start`.
    fn short<T>(&self, start: usize) -> Result<Option<T>, DicomError> {
        if self.truncated {
            Ok(None)
        } else {
            Err(DicomError::Truncated(start))
        }
    }

    fn ran_out(&self, start: usize) -> Result<Flow, DicomError> {
        self.short::<()>(start).map(|_| Flow::Halt)
    }
}

fn read_element_header(
    reader: &mut Reader<'_>,
    explicit: bool,
) -> Result<Option<RawElement>, DicomError> {
    if reader.remaining() == 0 {
        return Ok(None);
    }
    let start = reader.pos;
    let (Some(group), Some(element)) = (reader.u16(), reader.u16()) else {
        return reader.short(start);
    };
    let tag = Tag::new(group, element);

    // Items and delimiters never carry a VR.
    if group == 0xFFFE {
        let Some(length) = reader.u32() else {
            return reader.short(start);
        };
        return Ok(Some(RawElement {
            tag,
            vr: *b"--",
            length,
        }));
    }

    if !explicit {
        let Some(length) = reader.u32() else {
            return reader.short(start);
        };
        return Ok(Some(RawElement {
            tag,
            vr: implicit_vr(tag),
            length,
        }));
    }

    let Some(vr_bytes) = reader.bytes(2) else {
        return reader.short(start);
    };
    let vr = [vr_bytes[0], vr_bytes[1]];
    if !vr.iter().all(|c| c.is_ascii_uppercase()) {
        return Err(DicomError::InvalidVr(start));
    }

    let length = if has_long_length(&vr) {
        let (Some(_reserved), Some(length)) = (reader.u16(), reader.u32()) else {
            return reader.short(start);
        };
        length
    } else {
        let Some(length) = reader.u16() else {
            return reader.short(start);
        };
        length as u32
    };

    Ok(Some(RawElement { tag, vr, length }))
}

/// Walk elements until the data ends, Pixel Data is reached, or (inside an undefined-length
/// item) the item delimiter is found.
fn walk_elements(
    reader: &mut Reader<'_>,
    explicit: bool,
    mut header: Option<&mut DicomHeader>,
    depth: usize,
    in_item: bool,
) -> Result<Flow, DicomError> {
    loop {
        let start = reader.pos;
        let Some(element) = read_element_header(reader, explicit)? else {
            if in_item && !reader.truncated {
                return Err(DicomError::Truncated(start));
            }
            return Ok(Flow::Halt);
        };

        if !in_item && element.tag == Tag::PIXEL_DATA {
            if let Some(h) = header.as_deref_mut() {
                h.reached_pixel_data = true;
            }
            return Ok(Flow::Halt);
        }
        if in_item && element.tag == Tag::ITEM_DELIMITATION {
            return Ok(Flow::Continue);
        }
        if element.tag.group == 0xFFFE {
            return Err(DicomError::UnexpectedDelimiter(start));
        }

        if element.length == UNDEFINED_LENGTH {
            // SQ, or UN encoded as an implicit little endian sequence
            let nested_explicit = explicit && &element.vr != b"UN";
            match skip_sequence(reader, nested_explicit, depth + 1)? {
                Flow::Continue => continue,
                Flow::Halt => return Ok(Flow::Halt),
            }
        }

        let Some(value) = reader.bytes(element.length as usize) else {
            return reader.ran_out(start);
        };

        if let Some(h) = header.as_deref_mut() {
            record(h, &element, value);
        }
    }
}

fn skip_sequence(reader: &mut Reader<'_>, explicit: bool, depth: usize) -> Result<Flow, DicomError> {
    if depth > MAX_SEQUENCE_DEPTH {
        return Err(DicomError::TooDeep);
    }
    loop {
        let start = reader.pos;
        let Some(item) = read_element_header(reader, explicit)? else {
            return reader.ran_out(start);
        };

        match item.tag {
            Tag::SEQUENCE_DELIMITATION => return Ok(Flow::Continue),
            Tag::ITEM if item.length == UNDEFINED_LENGTH => {
                if let Flow::Halt = walk_elements(reader, explicit, None, depth, true)? {
                    return Ok(Flow::Halt);
                }
            }
            Tag::ITEM => {
                if reader.bytes(item.length as usize).is_none() {
                    return reader.ran_out(start);
                }
            }
            _ => return Err(DicomError::UnexpectedDelimiter(start)),
        }
    }
}

fn record(header: &mut DicomHeader, element: &RawElement, value: &[u8]) {
    let vr = std::str::from_utf8(&element.vr).unwrap_or("UN");
    let text = match &element.vr {
        b"US" if value.len() == 2 => u16::from_le_bytes([value[0], value[1]]).to_string(),
        code if is_text_vr(code) && value.len() <= MAX_TEXT_VALUE => String::from_utf8_lossy(value)
            .trim_end_matches(['\0', ' '])
            .trim()
            .to_string(),
        _ => return,
    };

    header.elements.insert(
        element.tag,
        DicomElement {
            vr: vr.to_string(),
            value: text,
        },
    );
}

fn has_long_length(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR"
            | b"UT" | b"UV"
    )
}

fn is_text_vr(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"AE" | b"AS" | b"CS" | b"DA" | b"DS" | b"DT" | b"IS" | b"LO" | b"LT" | b"PN" | b"SH"
            | b"ST" | b"TM" | b"UC" | b"UI" | b"UR" | b"UT"
    )
}

/// VRs for the elements recorded from implicit VR datasets.
fn implicit_vr(tag: Tag) -> [u8; 2] {
    match (tag.group, tag.element) {
        (0x0008, 0x0016) | (0x0008, 0x0018) | (0x0020, 0x000D) | (0x0020, 0x000E) => *b"UI",
        (0x0008, 0x0008) | (0x0008, 0x0060) | (0x0010, 0x0040) | (0x0018, 0x0015) => *b"CS",
        (0x0008, 0x0020..=0x0023) | (0x0010, 0x0030) => *b"DA",
        (0x0008, 0x0030..=0x0033) => *b"TM",
        (0x0008, 0x0050) | (0x0020, 0x0010) | (0x0010, 0x2154) => *b"SH",
        (0x0008, 0x0090) | (0x0008, 0x1048) | (0x0008, 0x1050) | (0x0008, 0x1070) => *b"PN",
        (0x0010, 0x0010) | (0x0010, 0x1001) => *b"PN",
        (0x0008, 0x0070) | (0x0008, 0x0080) | (0x0008, 0x1030) | (0x0008, 0x103E) => *b"LO",
        (0x0010, 0x0020) | (0x0010, 0x1000) | (0x0010, 0x1040) => *b"LO",
        (0x0008, 0x0081) => *b"ST",
        (0x0010, 0x1010) => *b"AS",
        (0x0020, 0x0011..=0x0013) => *b"IS",
        (0x0018, 0x0050) | (0x0018, 0x0088) | (0x0028, 0x0030) => *b"DS",
        (0x0028, 0x0010) | (0x0028, 0x0011) | (0x0028, 0x0100) => *b"US",
        _ => *b"UN",
    }
}
