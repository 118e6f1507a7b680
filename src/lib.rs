//! # ctxzip — context-oriented compression engine for line-delimited
//! genomic text formats (VCF/SAM/BAM/FASTQ-family).
//!
//! Engine guarantees:
//! - Every field is routed to a named [`context::Context`] (`dict`/`b250`/
//!   `local`), never to a generic byte stream — compression locality comes
//!   from grouping by field identity, not from a sliding window.
//! - Reconstruction is driven entirely by the [`snip`] instruction set and
//!   [`container`] engine recorded at segmentation time; there is no
//!   separate "decoder" code path to keep in sync with the encoder.
//! - Every section is self-describing ([`format::SectionHeader`]): magic,
//!   type, codec, CRC32, declared lengths. The trailing
//!   [`format::GenozipHeader`] anchors the section list so a reader seeks
//!   straight to it without scanning the file.
//! - A VB's reconstructed byte count is checked against what segmentation
//!   declared; mismatches are fatal with a reproduction command, never a
//!   silent partial decode.

pub mod error;
pub mod dict_id;
pub mod dict;
pub mod lookback;
pub mod context;
pub mod peek;
pub mod snip;
pub mod container;
pub mod deferred;
pub mod codec;
pub mod format;
pub mod section;
pub mod vb;
pub mod reconstruct;
pub mod gencomp;
pub mod pipeline;
pub mod cli;

// Flat re-exports for the most common types.
pub use context::{Context, ContextTable};
pub use dict_id::{DictId, DictIdType};
pub use error::{EngineError, ErrorSite, Result};
pub use format::{GenozipHeader, SectionHeader, SectionType, FORMAT_VERSION, MAGIC};
pub use section::{SectionEnt, SectionList};
pub use vb::{CompKind, VariantBlock};
