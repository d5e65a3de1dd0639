//! Binary artifact ingestion for z/Architecture load modules and program
//! objects.
//!
//! Detects the artifact format, locates the code region, and extracts the
//! module metadata the rest of the pipeline depends on. Ingestion is the
//! only stage that can fail outright: once a code region has been located,
//! every downstream stage degrades gracefully instead of erroring.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{EngineError, Result};
use crate::types::{ArtifactFormat, ModuleMetadata, SectionInfo};

/// Program-object magic: binder-produced artifacts begin with these bytes.
const PROGRAM_OBJECT_MAGIC: [u8; 2] = [0x00, 0x03];

/// Minimum file size for any recognized artifact.
const MIN_FILE_SIZE: usize = 8;

/// Program-object header size, in bytes, before the first external/section
/// descriptor.
const PROGRAM_OBJECT_HEADER_SIZE: usize = 32;

/// PDS directory entry size, when a load module is preceded by one.
const PDS_HEADER_SIZE: usize = 20;

/// Entry-point instruction patterns recognized at the start of a load
/// module, or scanned for during heuristic fallback.
const ENTRY_PATTERNS: [[u8; 2]; 4] = [
    [0x47, 0xF0], // BC 15,x - unconditional branch
    [0x90, 0xEC], // STM 14,12,x - save registers
    [0x18, 0x0F], // LR 0,15 - load register
    [0x05, 0xC0], // BALR 12,0 - establish base
];

/// Result of ingesting one artifact: its metadata plus the located code
/// bytes.
#[derive(Debug, Clone)]
pub struct IngestedArtifact {
    /// Extracted metadata.
    pub metadata: ModuleMetadata,
    /// Start offset of the code region within the file.
    pub code_start: usize,
    /// End offset (exclusive) of the code region within the file.
    pub code_end: usize,
}

impl IngestedArtifact {
    /// The code/text portion of the artifact.
    pub fn code_bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.code_start..self.code_end]
    }
}

/// Ingest a raw byte buffer, detecting its format and locating the code
/// region.
///
/// `module_name` is typically the input file's stem; it has no bearing on
/// format detection.
pub fn ingest(data: &[u8], module_name: Option<String>) -> Result<IngestedArtifact> {
    if data.len() < MIN_FILE_SIZE {
        return Err(EngineError::FileTooSmall {
            expected: MIN_FILE_SIZE,
            actual: data.len(),
        });
    }

    let mut metadata = ModuleMetadata {
        name: module_name,
        ..ModuleMetadata::default()
    };

    let (code_start, code_end) = if data.len() >= 4 && data[0..2] == PROGRAM_OBJECT_MAGIC {
        metadata.format_type = Some(ArtifactFormat::ProgramObject);
        parse_program_object(data, &mut metadata)?
    } else if looks_like_load_module(data) {
        metadata.format_type = Some(ArtifactFormat::LoadModule);
        parse_load_module(data, &mut metadata)
    } else {
        metadata.format_type = Some(ArtifactFormat::Unknown);
        apply_heuristics(data, &mut metadata, 256)
    };

    if code_start >= code_end {
        return Err(EngineError::EmptyCodeRegion {
            start: code_start,
            end: code_end,
        });
    }

    Ok(IngestedArtifact {
        metadata,
        code_start,
        code_end,
    })
}

/// Like [`ingest`], but uses `max_scan_bytes` (from [`crate::types::EngineOptions`])
/// as the heuristic entry-point search window instead of the 256-byte
/// default.
pub fn ingest_with_scan_window(
    data: &[u8],
    module_name: Option<String>,
    max_scan_bytes: usize,
) -> Result<IngestedArtifact> {
    if data.len() < MIN_FILE_SIZE {
        return Err(EngineError::FileTooSmall {
            expected: MIN_FILE_SIZE,
            actual: data.len(),
        });
    }
    let mut metadata = ModuleMetadata {
        name: module_name,
        ..ModuleMetadata::default()
    };
    let (code_start, code_end) = if data.len() >= 4 && data[0..2] == PROGRAM_OBJECT_MAGIC {
        metadata.format_type = Some(ArtifactFormat::ProgramObject);
        parse_program_object(data, &mut metadata)?
    } else if looks_like_load_module(data) {
        metadata.format_type = Some(ArtifactFormat::LoadModule);
        parse_load_module(data, &mut metadata)
    } else {
        metadata.format_type = Some(ArtifactFormat::Unknown);
        apply_heuristics(data, &mut metadata, max_scan_bytes)
    };
    if code_start >= code_end {
        return Err(EngineError::EmptyCodeRegion {
            start: code_start,
            end: code_end,
        });
    }
    Ok(IngestedArtifact {
        metadata,
        code_start,
        code_end,
    })
}

fn looks_like_load_module(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    ENTRY_PATTERNS.iter().any(|p| data.starts_with(p))
}

fn has_pds_header(data: &[u8]) -> bool {
    if data.len() < PDS_HEADER_SIZE {
        return false;
    }
    data[0..8]
        .iter()
        .all(|&b| b == 0x40 || (0xC1..=0xE9).contains(&b))
}

fn parse_load_module(data: &[u8], metadata: &mut ModuleMetadata) -> (usize, usize) {
    let offset = if has_pds_header(data) {
        let member = ebcdic_to_ascii(&data[0..8]);
        metadata
            .attributes
            .insert("pds_member".to_string(), member);
        PDS_HEADER_SIZE
    } else {
        0
    };

    let code_start = offset;
    let code_end = data.len();

    if code_start < data.len() {
        metadata.entry_point = Some(code_start as u32);
    }

    metadata.amode = Some(31);
    metadata.rmode = Some("ANY".to_string());

    (code_start, code_end)
}

fn parse_program_object(data: &[u8], metadata: &mut ModuleMetadata) -> Result<(usize, usize)> {
    if data.len() < PROGRAM_OBJECT_HEADER_SIZE {
        return Err(EngineError::MalformedProgramObject {
            message: format!(
                "header requires {} bytes, file has {}",
                PROGRAM_OBJECT_HEADER_SIZE,
                data.len()
            ),
        });
    }

    let text_size = BigEndian::read_u32(&data[8..12]);
    let entry_offset = BigEndian::read_u32(&data[12..16]);
    let external_count = BigEndian::read_u16(&data[16..18]) as usize;
    let section_count = BigEndian::read_u16(&data[18..20]) as usize;

    let code_start = PROGRAM_OBJECT_HEADER_SIZE;
    let code_end = (code_start + text_size as usize).min(data.len());
    // `entry_offset` is relative to the start of the text region; the
    // disassembler's base address is `code_start`, so the entry point must
    // be translated into that same absolute address space.
    metadata.entry_point = Some(code_start as u32 + entry_offset);
    metadata.amode = Some(31);
    metadata.rmode = Some("ANY".to_string());

    let mut offset = PROGRAM_OBJECT_HEADER_SIZE;
    for _ in 0..external_count {
        if offset + 16 > data.len() {
            break;
        }
        let name = ebcdic_to_ascii(&data[offset..offset + 8]);
        metadata.external_symbols.push(name.trim_end().to_string());
        offset += 16;
    }
    for _ in 0..section_count {
        if offset + 20 > data.len() {
            break;
        }
        let section_offset = BigEndian::read_u32(&data[offset..offset + 4]);
        let size = BigEndian::read_u32(&data[offset + 4..offset + 8]);
        metadata.csect_info.push(SectionInfo {
            offset: section_offset,
            size,
            kind: "text".to_string(),
        });
        offset += 20;
    }

    Ok((code_start, code_end))
}

fn apply_heuristics(data: &[u8], metadata: &mut ModuleMetadata, max_scan_bytes: usize) -> (usize, usize) {
    let scan_limit = max_scan_bytes.min(data.len().saturating_sub(2));
    let mut entry = None;
    let mut i = 0;
    while i < scan_limit {
        let opcode = &data[i..i + 2];
        if opcode == ENTRY_PATTERNS[1] {
            entry = Some(i);
            break;
        }
        if opcode[0] == 0x05 || opcode[0] == 0x0D {
            entry = Some(i);
            break;
        }
        i += 2;
    }
    metadata.entry_point = Some(entry.unwrap_or(0) as u32);
    metadata.amode = Some(31);
    metadata.rmode = Some("ANY".to_string());
    (0, data.len())
}

/// Convert an EBCDIC byte run to ASCII.
///
/// `0x40` maps to a space, `0xC1-0xC9`/`0xD1-0xD9`/`0xE2-0xE9` map to the
/// uppercase letter ranges A-I/J-R/S-Z, `0xF0-0xF9` maps to the digits, and
/// everything else maps to `.`.
pub fn ebcdic_to_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x40 => ' ',
            0xC1..=0xC9 => (b'A' + (b - 0xC1)) as char,
            0xD1..=0xD9 => (b'J' + (b - 0xD1)) as char,
            0xE2..=0xE9 => (b'S' + (b - 0xE2)) as char,
            0xF0..=0xF9 => (b'0' + (b - 0xF0)) as char,
            _ => '.',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_too_small() {
        let data = [0u8; 4];
        let err = ingest(&data, None).unwrap_err();
        assert!(matches!(err, EngineError::FileTooSmall { .. }));
    }

    #[test]
    fn test_program_object_header() {
        let mut data = vec![0u8; 32];
        data[0] = 0x00;
        data[1] = 0x03;
        data[8..12].copy_from_slice(&16u32.to_be_bytes());
        data[12..16].copy_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&[0x05, 0xEF, 0x07, 0xFE]);
        data.extend(std::iter::repeat(0).take(12));
        let artifact = ingest(&data, Some("TEST".to_string())).unwrap();
        assert_eq!(artifact.metadata.format_type, Some(ArtifactFormat::ProgramObject));
        assert_eq!(artifact.code_start, 32);
        // entry_offset is 0, translated into the code region's absolute
        // address space (code_start + entry_offset).
        assert_eq!(artifact.metadata.entry_point, Some(32));
    }

    #[test]
    fn test_load_module_detection() {
        let data = [0x47, 0xF0, 0x10, 0x00, 0x07, 0xFE, 0x00, 0x00];
        let artifact = ingest(&data, None).unwrap();
        assert_eq!(artifact.metadata.format_type, Some(ArtifactFormat::LoadModule));
        assert_eq!(artifact.code_start, 0);
        assert_eq!(artifact.code_end, data.len());
    }

    #[test]
    fn test_pds_header_stripped() {
        // 8 bytes of EBCDIC spaces + 12 more header bytes, then a load-module body.
        let mut data = vec![0x40u8; 20];
        data.extend_from_slice(&[0x90, 0xEC, 0xD0, 0x0C, 0x07, 0xFE]);
        let artifact = ingest(&data, None).unwrap();
        assert_eq!(artifact.code_start, PDS_HEADER_SIZE);
    }

    #[test]
    fn test_unknown_format_heuristics() {
        let mut data = vec![0xFFu8; 40];
        data[10] = 0x90;
        data[11] = 0xEC;
        let artifact = ingest(&data, None).unwrap();
        assert_eq!(artifact.metadata.format_type, Some(ArtifactFormat::Unknown));
        assert_eq!(artifact.metadata.entry_point, Some(10));
    }

    #[test]
    fn test_ebcdic_conversion() {
        // EBCDIC for "HELLO" (roughly): H=C8 E=C5 L=D3 L=D3 O=D6
        let ebcdic = [0xC8, 0xC5, 0xD3, 0xD3, 0xD6];
        assert_eq!(ebcdic_to_ascii(&ebcdic), "HELLO");
        assert_eq!(ebcdic_to_ascii(&[0x40]), " ");
        assert_eq!(ebcdic_to_ascii(&[0xF1, 0xF2, 0xF3]), "123");
        assert_eq!(ebcdic_to_ascii(&[0x00]), ".");
    }
}
