//! Typed errors for the context-oriented compression engine.
//!
//! Every fatal error carries enough structured context (VB id, line-in-VB,
//! context name) to format the single stderr diagnostic line the engine's
//! user-visible contract requires. Skip-allowed conditions (a filter
//! dropping a line) are never represented here — they are not errors.

use std::fmt;
use thiserror::Error;

/// Coordinates identifying where a fatal error occurred, attached to most
/// variants below. `None` fields mean "not yet known at the point of error".
#[derive(Debug, Clone, Default)]
pub struct ErrorSite {
    pub vb_i: Option<u32>,
    pub comp_i: Option<u16>,
    pub line_i: Option<u32>,
    pub offset: Option<u64>,
    pub context_name: Option<String>,
}

impl ErrorSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vb(mut self, vb_i: u32) -> Self {
        self.vb_i = Some(vb_i);
        self
    }

    pub fn line(mut self, line_i: u32) -> Self {
        self.line_i = Some(line_i);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.context_name = Some(name.into());
        self
    }
}

impl fmt::Display for ErrorSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(vb_i) = self.vb_i {
            parts.push(format!("vb={vb_i}"));
        }
        if let Some(comp_i) = self.comp_i {
            parts.push(format!("comp={comp_i}"));
        }
        if let Some(line_i) = self.line_i {
            parts.push(format!("line={line_i}"));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("offset={offset}"));
        }
        if let Some(name) = &self.context_name {
            parts.push(format!("ctx={name}"));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Top-level fatal error surface. A [`Result<_, EngineError>`] reaching the
/// CLI aborts the process after cleanup; there is no recovery path for
/// anything other than `Skip`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input record (segmentation-time). Carries a short window
    /// of the surrounding input for reproduction, as the error-handling
    /// contract requires.
    #[error("format error at {site}: {detail} (near: {window:?})")]
    Format {
        site: ErrorSite,
        detail: String,
        window: String,
    },

    /// Decompression failure or declared/actual size mismatch.
    #[error("codec error at {site}: {detail}")]
    Codec { site: ErrorSite, detail: String },

    /// File declares a feature newer than this build understands.
    #[error("version error: file requires feature '{feature}' (format version {found}, this build supports up to {supported}) — upgrade required")]
    VersionGate {
        feature: String,
        found: u32,
        supported: u32,
    },

    /// Violated context invariant: delta against a non-INT base, word index
    /// out of range, end-of-local reached early, etc.
    #[error("context invariant violated at {site}: {detail} (lhs_ctx={lhs}, rhs_ctx={rhs:?})")]
    ContextInvariant {
        site: ErrorSite,
        detail: String,
        lhs: String,
        rhs: Option<String>,
    },

    /// Queue overflow, disk full on scratch, re-read seek failure, etc.
    #[error("resource error at {site}: {detail}")]
    Resource { site: ErrorSite, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Format the single stderr diagnostic line this engine's error
    /// contract demands: file name + VB + line + failing context + a short
    /// quoted window of surrounding characters when known.
    pub fn diagnostic_line(&self, input_file: &str) -> String {
        format!("{input_file}: {self}")
    }

    pub fn format(site: ErrorSite, detail: impl Into<String>, window: impl Into<String>) -> Self {
        EngineError::Format {
            site,
            detail: detail.into(),
            window: window.into(),
        }
    }

    pub fn context_invariant(
        site: ErrorSite,
        detail: impl Into<String>,
        lhs: impl Into<String>,
        rhs: Option<String>,
    ) -> Self {
        EngineError::ContextInvariant {
            site,
            detail: detail.into(),
            lhs: lhs.into(),
            rhs,
        }
    }

    pub fn resource(site: ErrorSite, detail: impl Into<String>) -> Self {
        EngineError::Resource {
            site,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_line_includes_site_fields() {
        let site = ErrorSite::new().vb(3).line(42).context("POS");
        let err = EngineError::context_invariant(site, "base lacks store=INT", "POS", Some("FILTER".into()));
        let line = err.diagnostic_line("sample.vcf");
        assert!(line.contains("sample.vcf"));
        assert!(line.contains("vb=3"));
        assert!(line.contains("line=42"));
        assert!(line.contains("ctx=POS"));
    }
}
