//! On-disk section header layout and the trailing footer that anchors the
//! section list.
//!
//! Every section (a VB's dict, b250, or local stream; the text header; the
//! section list itself) is preceded by one of these headers. The footer at
//! the end of the file is a fixed-size record holding the absolute byte
//! offset of the section list, so a reader can seek straight there without
//! scanning the whole file — the same "read the last N bytes first" trick
//! the block-archive model this crate grew out of used for its index.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::codec::CodecId;
use crate::error::{EngineError, ErrorSite, Result};

pub const MAGIC: [u8; 4] = *b"CtxZ";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionType {
    TxtHeader = 0,
    VbHeader = 1,
    Dict = 2,
    B250 = 3,
    Local = 4,
    SectionList = 5,
    /// Trailing file-level header carrying only the absolute offset of
    /// the section list — this crate's analogue of a superblock, but
    /// written last instead of first so it can record a value (the
    /// section list's offset) unknown at the start of the file.
    GenozipHeader = 6,
}

impl SectionType {
    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => SectionType::TxtHeader,
            1 => SectionType::VbHeader,
            2 => SectionType::Dict,
            3 => SectionType::B250,
            4 => SectionType::Local,
            5 => SectionType::SectionList,
            6 => SectionType::GenozipHeader,
            other => {
                return Err(EngineError::format(
                    ErrorSite::new(),
                    format!("unknown section type byte {other}"),
                    String::new(),
                ))
            }
        })
    }
}

/// # On-disk layout
/// | Offset | Size | Field                   |
/// |-------:|-----:|-------------------------|
/// |      0 |    4 | magic (`"CtxZ"`)        |
/// |      4 |    1 | section_type            |
/// |      5 |    1 | codec                   |
/// |      6 |    1 | sub_codec (0xFF = none) |
/// |      7 |    4 | vblock_i                |
/// |     11 |    4 | z_digest (CRC32)        |
/// |     15 |    4 | data_compressed_len     |
/// |     19 |    4 | data_uncompressed_len   |
/// |     23 |    4 | data_encrypted_len      |
/// |     27 |    1 | flags                   |
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub section_type: SectionType,
    pub codec: CodecId,
    pub sub_codec: Option<CodecId>,
    pub vblock_i: u32,
    pub z_digest: u32,
    pub data_compressed_len: u32,
    pub data_uncompressed_len: u32,
    /// Kept for on-disk layout fidelity with the framing this format grew
    /// out of; encryption itself is out of scope, so this is always 0.
    pub data_encrypted_len: u32,
    pub flags: u8,
}

pub const SECTION_HEADER_LEN: usize = 28;

impl SectionHeader {
    pub fn new(section_type: SectionType, codec: CodecId, vblock_i: u32) -> Self {
        SectionHeader {
            section_type,
            codec,
            sub_codec: None,
            vblock_i,
            z_digest: 0,
            data_compressed_len: 0,
            data_uncompressed_len: 0,
            data_encrypted_len: 0,
            flags: 0,
        }
    }

    /// Compute and set `z_digest` and the two length fields from the
    /// compressed bytes actually written and the original uncompressed
    /// length.
    pub fn finalize_lengths(&mut self, compressed: &[u8], uncompressed_len: usize) {
        let mut hasher = Crc32::new();
        hasher.update(compressed);
        self.z_digest = hasher.finalize();
        self.data_compressed_len = compressed.len() as u32;
        self.data_uncompressed_len = uncompressed_len as u32;
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.push(self.section_type as u8);
        out.push(self.codec.to_u8());
        out.push(self.sub_codec.map(CodecId::to_u8).unwrap_or(0xFF));
        out.write_u32::<LittleEndian>(self.vblock_i).unwrap();
        out.write_u32::<LittleEndian>(self.z_digest).unwrap();
        out.write_u32::<LittleEndian>(self.data_compressed_len).unwrap();
        out.write_u32::<LittleEndian>(self.data_uncompressed_len).unwrap();
        out.write_u32::<LittleEndian>(self.data_encrypted_len).unwrap();
        out.push(self.flags);
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SECTION_HEADER_LEN {
            return Err(EngineError::format(
                ErrorSite::new(),
                "truncated section header",
                hex_window(bytes),
            ));
        }
        if bytes[0..4] != MAGIC {
            return Err(EngineError::format(ErrorSite::new(), "bad section header magic", hex_window(bytes)));
        }
        let section_type = SectionType::from_u8(bytes[4])?;
        let codec = CodecId::from_u8(bytes[5]).ok_or_else(|| {
            EngineError::format(ErrorSite::new(), format!("unknown codec byte {}", bytes[5]), hex_window(bytes))
        })?;
        let sub_codec = if bytes[6] == 0xFF { None } else { CodecId::from_u8(bytes[6]) };
        let mut cursor = &bytes[7..];
        let vblock_i = cursor.read_u32::<LittleEndian>().unwrap();
        let z_digest = cursor.read_u32::<LittleEndian>().unwrap();
        let data_compressed_len = cursor.read_u32::<LittleEndian>().unwrap();
        let data_uncompressed_len = cursor.read_u32::<LittleEndian>().unwrap();
        let data_encrypted_len = cursor.read_u32::<LittleEndian>().unwrap();
        let flags = cursor.read_u8().unwrap();

        Ok(SectionHeader {
            section_type,
            codec,
            sub_codec,
            vblock_i,
            z_digest,
            data_compressed_len,
            data_uncompressed_len,
            data_encrypted_len,
            flags,
        })
    }

    pub fn verify_digest(&self, compressed: &[u8]) -> Result<()> {
        let mut hasher = Crc32::new();
        hasher.update(compressed);
        if hasher.finalize() != self.z_digest {
            return Err(EngineError::Codec {
                site: ErrorSite::new().context(format!("vb={}", self.vblock_i)),
                detail: "section CRC32 mismatch".to_string(),
            });
        }
        Ok(())
    }
}

fn hex_window(bytes: &[u8]) -> String {
    let window = &bytes[..bytes.len().min(16)];
    window.iter().map(|b| format!("{b:02x}")).collect()
}

/// Trailing fixed-size footer: magic, format version, and the absolute
/// byte offset of the section list. Always exactly
/// [`GENOZIP_HEADER_LEN`] bytes, written once, last.
pub const GENOZIP_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct GenozipHeader {
    pub format_version: u32,
    pub section_list_offset: u64,
}

impl GenozipHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.write_u32::<LittleEndian>(self.format_version).unwrap();
        out.write_u64::<LittleEndian>(self.section_list_offset).unwrap();
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != GENOZIP_HEADER_LEN || bytes[0..4] != MAGIC {
            return Err(EngineError::format(ErrorSite::new(), "bad trailing footer", hex_window(bytes)));
        }
        let mut cursor = &bytes[4..];
        let format_version = cursor.read_u32::<LittleEndian>().unwrap();
        if format_version > FORMAT_VERSION {
            return Err(EngineError::VersionGate {
                feature: "file format".to_string(),
                found: format_version,
                supported: FORMAT_VERSION,
            });
        }
        let section_list_offset = cursor.read_u64::<LittleEndian>().unwrap();
        Ok(GenozipHeader {
            format_version,
            section_list_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_header_roundtrips() {
        let mut header = SectionHeader::new(SectionType::B250, CodecId::Zstd, 7);
        header.finalize_lengths(b"compressed-bytes", 123);
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), SECTION_HEADER_LEN);

        let decoded = SectionHeader::read(&buf).unwrap();
        assert_eq!(decoded.section_type, SectionType::B250);
        assert_eq!(decoded.codec, CodecId::Zstd);
        assert_eq!(decoded.vblock_i, 7);
        assert_eq!(decoded.data_uncompressed_len, 123);
        decoded.verify_digest(b"compressed-bytes").unwrap();
    }

    #[test]
    fn tampered_payload_fails_digest_check() {
        let mut header = SectionHeader::new(SectionType::Dict, CodecId::None, 1);
        header.finalize_lengths(b"original", 8);
        assert!(header.verify_digest(b"tampered").is_err());
    }

    #[test]
    fn footer_rejects_newer_format_version() {
        let footer = GenozipHeader {
            format_version: FORMAT_VERSION + 1,
            section_list_offset: 1024,
        };
        let mut buf = Vec::new();
        footer.write(&mut buf);
        let err = GenozipHeader::read(&buf).unwrap_err();
        assert!(matches!(err, EngineError::VersionGate { .. }));
    }

    #[test]
    fn footer_roundtrips_at_current_version() {
        let footer = GenozipHeader {
            format_version: FORMAT_VERSION,
            section_list_offset: 4096,
        };
        let mut buf = Vec::new();
        footer.write(&mut buf);
        assert_eq!(buf.len(), GENOZIP_HEADER_LEN);
        let decoded = GenozipHeader::read(&buf).unwrap();
        assert_eq!(decoded.section_list_offset, 4096);
    }
}
