//! Codec dispatch: a closed, named set of codecs selected per context by
//! compressed-size sampling rather than negotiated identity.
//!
//! Unlike a general-purpose archive, a context's codec choice is local
//! policy recorded in its section header (`format.rs`) — there is no
//! cross-file codec registry and no requirement that every codec a file
//! uses be enumerated up front. A handful of codecs are *compound*: they
//! govern a correlated pair of sections (a primary stream plus a
//! `local_dep` stream that must be compressed after it, since it may
//! reference the primary's reconstructed values).

pub mod acgt;
pub mod generic;
pub mod qual;

use crate::error::{EngineError, ErrorSite, Result};

/// How much of a context's `local`/`dict` payload to sample when picking a
/// codec — sampling the whole buffer for a multi-gigabyte VB would be
/// wasteful when the first 100KiB predicts the winner almost every time.
pub const SAMPLE_SIZE: usize = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    None,
    Zstd,
    Lz4,
    Brotli,
    Lzma,
    /// 2-bit-packed ACGT sequence codec (§ sequence data).
    Acgt,
    Normq,
    Domq,
    Longr,
    Homp,
    Pacb,
    Smux,
    T0,
    Oq,
    Pbwt,
}

impl CodecId {
    pub const SIMPLE: [CodecId; 5] = [CodecId::None, CodecId::Zstd, CodecId::Lz4, CodecId::Brotli, CodecId::Lzma];

    /// The compound (primary + `local_dep`) quality-family codecs, in the
    /// order they'd be tried during codec assignment. Each of these
    /// delegates its entropy stage to `codec::generic` — no per-family
    /// statistical transform is implemented, since none is specified
    /// beyond the section-pair shape itself.
    pub const COMPOUND: [CodecId; 9] = [
        CodecId::Normq,
        CodecId::Domq,
        CodecId::Longr,
        CodecId::Homp,
        CodecId::Pacb,
        CodecId::Smux,
        CodecId::T0,
        CodecId::Oq,
        CodecId::Pbwt,
    ];

    pub fn is_simple(self) -> bool {
        Self::SIMPLE.contains(&self)
    }

    pub fn is_compound(self) -> bool {
        Self::COMPOUND.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Zstd => "zstd",
            CodecId::Lz4 => "lz4",
            CodecId::Brotli => "brotli",
            CodecId::Lzma => "lzma",
            CodecId::Acgt => "acgt",
            CodecId::Normq => "normq",
            CodecId::Domq => "domq",
            CodecId::Longr => "longr",
            CodecId::Homp => "homp",
            CodecId::Pacb => "pacb",
            CodecId::Smux => "smux",
            CodecId::T0 => "t0",
            CodecId::Oq => "oq",
            CodecId::Pbwt => "pbwt",
        }
    }

    /// Stable on-disk encoding used by `section.rs`'s `SectionHeader`.
    /// Never reordered — new codecs are appended, never inserted.
    pub fn to_u8(self) -> u8 {
        match self {
            CodecId::None => 0,
            CodecId::Zstd => 1,
            CodecId::Lz4 => 2,
            CodecId::Brotli => 3,
            CodecId::Lzma => 4,
            CodecId::Acgt => 5,
            CodecId::Normq => 6,
            CodecId::Domq => 7,
            CodecId::Longr => 8,
            CodecId::Homp => 9,
            CodecId::Pacb => 10,
            CodecId::Smux => 11,
            CodecId::T0 => 12,
            CodecId::Oq => 13,
            CodecId::Pbwt => 14,
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => CodecId::None,
            1 => CodecId::Zstd,
            2 => CodecId::Lz4,
            3 => CodecId::Brotli,
            4 => CodecId::Lzma,
            5 => CodecId::Acgt,
            6 => CodecId::Normq,
            7 => CodecId::Domq,
            8 => CodecId::Longr,
            9 => CodecId::Homp,
            10 => CodecId::Pacb,
            11 => CodecId::Smux,
            12 => CodecId::T0,
            13 => CodecId::Oq,
            14 => CodecId::Pbwt,
            _ => return None,
        })
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "none" => CodecId::None,
            "zstd" => CodecId::Zstd,
            "lz4" => CodecId::Lz4,
            "brotli" => CodecId::Brotli,
            "lzma" => CodecId::Lzma,
            "acgt" => CodecId::Acgt,
            "normq" => CodecId::Normq,
            "domq" => CodecId::Domq,
            "longr" => CodecId::Longr,
            "homp" => CodecId::Homp,
            "pacb" => CodecId::Pacb,
            "smux" => CodecId::Smux,
            "t0" => CodecId::T0,
            "oq" => CodecId::Oq,
            "pbwt" => CodecId::Pbwt,
            _ => return None,
        })
    }
}

/// Every codec implements the same three-operation contract regardless of
/// whether it's a thin wrapper over a general-purpose entropy coder or a
/// domain-specific transform.
pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>>;
    /// Cheap estimate of the compressed size — used to rank candidate
    /// codecs in `pick_best_codec` without paying for a full compress of
    /// every candidate on the whole payload.
    fn estimate_size(&self, data: &[u8]) -> usize;
}

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(generic::NoneCodec),
        CodecId::Zstd => Box::new(generic::ZstdCodec),
        CodecId::Lz4 => Box::new(generic::Lz4Codec),
        CodecId::Brotli => Box::new(generic::BrotliCodec),
        CodecId::Lzma => Box::new(generic::LzmaCodec),
        CodecId::Acgt => Box::new(acgt::AcgtCodec),
        other => Box::new(qual::QualCodec::new(other)),
    }
}

/// Compress a sample of `data` with each of `candidates` and return the id
/// with the smallest estimated size. Ties favor whichever candidate comes
/// first in the slice.
pub fn pick_best_codec(data: &[u8], candidates: &[CodecId]) -> Result<CodecId> {
    let sample = &data[..data.len().min(SAMPLE_SIZE)];
    candidates
        .iter()
        .copied()
        .min_by_key(|&id| get_codec(id).estimate_size(sample))
        .ok_or_else(|| EngineError::resource(ErrorSite::new(), "pick_best_codec called with no candidates"))
}
