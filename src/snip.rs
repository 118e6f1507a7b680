//! The snip instruction set — a compact byte-prefixed opcode language
//! embedded in dictionary entries that directs reconstruction.
//!
//! Byte 0 of a snip is an opcode in `[0, NUM_SNIP_CODES)` (or the sentinel
//! `LOOKUP` form, which is simply "no further bytes needed"); bytes `[1..)`
//! are the opcode's payload. This module owns the wire encode/decode and
//! `reconstruct_one_snip`, the single dispatch point both Seg (when
//! re-parsing a rolled-back snip) and Piz (reconstruction) go through.

use crate::context::{ContextTable, LastValue};
use crate::dict_id::DictId;
use crate::error::{EngineError, ErrorSite, Result};

/// Opcodes `< FIRST_RESERVED` are literal text; `snip[0]` is only treated as
/// an opcode byte when it falls in the reserved low range below.
pub const NUM_SNIP_CODES: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SnipOp {
    Lookup = 0,
    OtherLookup = 1,
    Numeric = 2,
    Container = 3,
    SelfDelta = 4,
    OtherDelta = 5,
    Copy = 6,
    Special = 7,
    Diff = 8,
    Redirection = 9,
    Dual = 10,
    Lookback = 11,
    DontStore = 12,
    /// Not a real wire opcode — used by [`Snip::opcode`] to mean "this byte
    /// is a literal text byte, not an opcode at all".
    Literal = 13,
}

impl SnipOp {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => SnipOp::Lookup,
            1 => SnipOp::OtherLookup,
            2 => SnipOp::Numeric,
            3 => SnipOp::Container,
            4 => SnipOp::SelfDelta,
            5 => SnipOp::OtherDelta,
            6 => SnipOp::Copy,
            7 => SnipOp::Special,
            8 => SnipOp::Diff,
            9 => SnipOp::Redirection,
            10 => SnipOp::Dual,
            11 => SnipOp::Lookback,
            12 => SnipOp::DontStore,
            _ => SnipOp::Literal,
        }
    }
}

/// Separator byte used between sub-snips of a `DUAL` opcode.
pub const SNIP_DUAL_SEP: u8 = 0xFE;

/// A borrowed view of one dictionary entry's bytes, interpreted as a snip.
#[derive(Debug, Clone, Copy)]
pub struct Snip<'a> {
    pub bytes: &'a [u8],
}

impl<'a> Snip<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Snip { bytes }
    }

    /// The snip consisting of nothing but `LOOKUP` — the "singleton" form
    /// that demotes its value into `local` entirely.
    pub fn is_pure_lookup(&self) -> bool {
        self.bytes.len() == 1 && self.bytes[0] == SnipOp::Lookup as u8
    }

    pub fn opcode(&self) -> SnipOp {
        match self.bytes.first() {
            Some(&b) if b < NUM_SNIP_CODES => SnipOp::from_byte(b),
            _ => SnipOp::Literal,
        }
    }

    pub fn payload(&self) -> &'a [u8] {
        if matches!(self.opcode(), SnipOp::Literal) {
            self.bytes
        } else {
            &self.bytes[1..]
        }
    }
}

/// Outcome of reconstructing one snip: either it produced output (appended
/// to the caller's buffer directly) or it was an `EMPTY`/`MISSING` marker
/// the caller must special-case at the container level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructOutcome {
    Wrote,
    Empty,
    Missing,
}

/// Reconstruct one snip belonging to `ctx` into `out`, mutating `ctx`'s
/// last-value registers as appropriate. `word_index` is the b250 entry that
/// selected this snip (used only for `EMPTY`/`MISSING` short-circuiting by
/// the caller — the snip bytes themselves are already resolved).
pub fn reconstruct_one_snip(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    match snip.opcode() {
        SnipOp::Lookup => reconstruct_lookup(table, ctx_idx, out),
        SnipOp::OtherLookup => reconstruct_other_lookup(table, ctx_idx, snip, out),
        SnipOp::Numeric => reconstruct_numeric(table, ctx_idx, snip, out),
        SnipOp::Container => {
            // The container body itself is parsed/executed by
            // `container::container_reconstruct`; by the time a snip
            // reaches this dispatcher with opcode `Container`, the caller
            // is expected to have already delegated — this arm exists so
            // the match stays exhaustive and so misrouted calls fail loud.
            Err(EngineError::context_invariant(
                ErrorSite::new(),
                "CONTAINER snip reached reconstruct_one_snip directly; caller must dispatch via container_reconstruct",
                table.name(ctx_idx),
                None,
            ))
        }
        SnipOp::SelfDelta => reconstruct_self_delta(table, ctx_idx, snip, out),
        SnipOp::OtherDelta => reconstruct_other_delta(table, ctx_idx, snip, out),
        SnipOp::Copy => reconstruct_copy(table, ctx_idx, snip, out),
        SnipOp::Special => reconstruct_special(table, ctx_idx, snip, out),
        SnipOp::Diff => reconstruct_diff(table, ctx_idx, snip, out),
        SnipOp::Redirection => reconstruct_redirection(table, ctx_idx, snip, out),
        SnipOp::Dual => reconstruct_dual(table, ctx_idx, snip, out, false),
        SnipOp::Lookback => reconstruct_lookback(table, ctx_idx, snip, out),
        SnipOp::DontStore => reconstruct_dont_store(table, ctx_idx, snip, out),
        SnipOp::Literal => reconstruct_literal(table, ctx_idx, snip, out),
    }
}

fn reconstruct_lookup(table: &mut ContextTable, ctx_idx: usize, out: &mut Vec<u8>) -> Result<ReconstructOutcome> {
    let ctx = table.get_mut(ctx_idx);
    let text = ctx.local.read_next_as_text(&mut ctx.next_local)?;
    out.extend_from_slice(&text);
    ctx.set_last_txt_range(out.len() - text.len(), text.len());
    if let Ok(n) = std::str::from_utf8(&text).unwrap_or("").parse::<i64>() {
        ctx.last_value = LastValue::Int(n);
    }
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_other_lookup(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let other = parse_base64_dict_id(table, ctx_idx, snip.payload())?;
    reconstruct_lookup(table, other, out)
}

fn reconstruct_numeric(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    if payload.len() < 2 {
        return Err(EngineError::context_invariant(
            ErrorSite::new(),
            "NUMERIC snip payload too short",
            table.name(ctx_idx),
            None,
        ));
    }
    let base_code = payload[0];
    let width = payload[1] as usize;
    let ctx = table.get_mut(ctx_idx);
    let value = ctx.local.read_next_as_int(&mut ctx.next_local)?;
    let formatted = match base_code {
        0 => format!("{:0width$}", value, width = width),
        1 => format!("{:0width$x}", value, width = width),
        2 => format!("{:0width$X}", value, width = width),
        _ => {
            return Err(EngineError::context_invariant(
                ErrorSite::new(),
                "NUMERIC snip has unknown base_code",
                table.name(ctx_idx),
                None,
            ))
        }
    };
    ctx.last_value = LastValue::Int(value);
    out.extend_from_slice(formatted.as_bytes());
    ctx.set_last_txt_range(out.len() - formatted.len(), formatted.len());
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_self_delta(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = std::str::from_utf8(snip.payload()).unwrap_or("");
    let ctx = table.get_mut(ctx_idx);
    let base = ctx.last_value.as_int().ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "SELF_DELTA on a context with no prior integer value",
            ctx.name.clone(),
            None,
        )
    })?;

    let (new_value, new_delta) = if payload.is_empty() {
        // Empty payload: negate the previous delta.
        let prev_delta = ctx.last_delta.ok_or_else(|| {
            EngineError::context_invariant(
                ErrorSite::new(),
                "SELF_DELTA(empty) with no previous delta to negate",
                ctx.name.clone(),
                None,
            )
        })?;
        (base + (-prev_delta), -prev_delta)
    } else if payload == "-" {
        (-base, -base - base)
    } else if let Some(hex) = payload.strip_prefix('x') {
        let delta = i64::from_str_radix(hex, 16).map_err(|_| {
            EngineError::context_invariant(ErrorSite::new(), "SELF_DELTA hex payload invalid", ctx.name.clone(), None)
        })?;
        (base + delta, delta)
    } else {
        let delta: i64 = payload.parse().map_err(|_| {
            EngineError::context_invariant(
                ErrorSite::new(),
                "SELF_DELTA payload is not a valid integer",
                ctx.name.clone(),
                None,
            )
        })?;
        (base + delta, delta)
    };

    ctx.last_value = LastValue::Int(new_value);
    ctx.last_delta = Some(new_delta);
    let formatted = new_value.to_string();
    out.extend_from_slice(formatted.as_bytes());
    ctx.set_last_txt_range(out.len() - formatted.len(), formatted.len());
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_other_delta(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    let (other, rest) = split_base64_prefix(payload);
    let other_idx = parse_base64_dict_id(table, ctx_idx, other)?;
    let delta: i64 = std::str::from_utf8(rest)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            EngineError::context_invariant(
                ErrorSite::new(),
                "OTHER_DELTA payload is not a valid integer",
                table.name(ctx_idx),
                Some(table.name(other_idx)),
            )
        })?;

    let other_ctx = table.get(other_idx);
    if !other_ctx.flags.store.is_int() {
        return Err(EngineError::context_invariant(
            ErrorSite::new(),
            "OTHER_DELTA base context does not have store=INT",
            table.name(ctx_idx),
            Some(table.name(other_idx)),
        ));
    }
    let base = other_ctx.last_value.as_int().ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "OTHER_DELTA base context has no value yet",
            table.name(ctx_idx),
            Some(table.name(other_idx)),
        )
    })?;

    let new_value = base + delta;
    let formatted = new_value.to_string();
    out.extend_from_slice(formatted.as_bytes());
    let ctx = table.get_mut(ctx_idx);
    ctx.last_value = LastValue::Int(new_value);
    ctx.set_last_txt_range(out.len() - formatted.len(), formatted.len());
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_copy(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    let source_idx = if payload.is_empty() {
        ctx_idx
    } else {
        parse_base64_dict_id(table, ctx_idx, payload)?
    };
    let source = table.get(source_idx);
    let (start, len) = source.last_txt.ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "COPY snip references a context with no last_txt recorded",
            table.name(ctx_idx),
            Some(table.name(source_idx)),
        )
    })?;
    let bytes = source.last_txt_bytes(out, start, len).to_vec();
    let propagated_value = source.last_value;
    out.extend_from_slice(&bytes);
    let ctx = table.get_mut(ctx_idx);
    ctx.last_value = propagated_value;
    ctx.set_last_txt_range(out.len() - bytes.len(), bytes.len());
    Ok(ReconstructOutcome::Wrote)
}

/// `SPECIAL`'s own kind byte, after the wire's `kind_byte - 32` offset has
/// already been undone by [`reconstruct_special`].
const SPECIAL_MINUS: u8 = 0;

/// Dispatch a `SPECIAL` snip to its handler by kind. The wire form is
/// `[kind_byte, body...]` where `kind_byte = kind + 32`; the offset keeps
/// low kind values out of the ASCII control range so a raw payload dump
/// stays printable in diagnostics.
fn reconstruct_special(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    let (&kind_byte, body) = payload.split_first().ok_or_else(|| {
        EngineError::context_invariant(ErrorSite::new(), "SPECIAL snip missing kind byte", table.name(ctx_idx), None)
    })?;
    let kind = kind_byte.checked_sub(32).ok_or_else(|| {
        EngineError::context_invariant(ErrorSite::new(), "SPECIAL snip kind byte underflows the +32 offset", table.name(ctx_idx), None)
    })?;
    match kind {
        SPECIAL_MINUS => reconstruct_special_minus(table, ctx_idx, body, out),
        other => Err(EngineError::context_invariant(
            ErrorSite::new(),
            format!("SPECIAL snip has no registered handler for kind {other}"),
            table.name(ctx_idx),
            None,
        )),
    }
}

/// `a - b`, where `a` and `b` are the two sibling contexts named by the
/// snip's base64 dict_id payload. The pair is resolved once per context
/// and cached in `con_cache`, since every subsequent MINUS snip on the
/// same context names the same two operands.
fn reconstruct_special_minus(
    table: &mut ContextTable,
    ctx_idx: usize,
    body: &[u8],
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let (ctx1_idx, ctx2_idx) = match table.get(ctx_idx).con_cache.as_slice() {
        &[a, b] => (a, b),
        _ => {
            let (first, rest) = split_base64_prefix(body);
            let a = parse_base64_dict_id(table, ctx_idx, first)?;
            let b = parse_base64_dict_id(table, ctx_idx, rest)?;
            table.get_mut(ctx_idx).con_cache = vec![a, b];
            (a, b)
        }
    };

    let v1 = table.get(ctx1_idx).last_value.as_int().ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "SPECIAL MINUS operand has no prior integer value",
            table.name(ctx_idx),
            Some(table.name(ctx1_idx)),
        )
    })?;
    let v2 = table.get(ctx2_idx).last_value.as_int().ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "SPECIAL MINUS operand has no prior integer value",
            table.name(ctx_idx),
            Some(table.name(ctx2_idx)),
        )
    })?;

    let new_value = v1 - v2;
    let formatted = new_value.to_string();
    out.extend_from_slice(formatted.as_bytes());
    let ctx = table.get_mut(ctx_idx);
    ctx.last_value = LastValue::Int(new_value);
    ctx.set_last_txt_range(out.len() - formatted.len(), formatted.len());
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_diff(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    let (base_part, rest) = if payload.first().copied().map(is_base64_byte).unwrap_or(false) && payload.len() >= 11 {
        split_base64_prefix(payload)
    } else {
        (&payload[0..0], payload)
    };
    let base_idx = if base_part.is_empty() {
        ctx_idx
    } else {
        parse_base64_dict_id(table, ctx_idx, base_part)?
    };
    let len_str = std::str::from_utf8(rest).unwrap_or("0");
    let signed_len: i64 = len_str.parse().unwrap_or(0);

    let base = table.get(base_idx);
    let (start, base_len) = base.last_txt.ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "DIFF snip references a context with no last_txt recorded",
            table.name(ctx_idx),
            Some(table.name(base_idx)),
        )
    })?;
    let base_bytes = base.last_txt_bytes(out, start, base_len).to_vec();

    let result = if signed_len < 0 {
        // Negative length: exact copy of base.
        base_bytes
    } else {
        // Substitute-if-nonzero mode (files >= v14): the literal payload
        // bytes after the length replace the base wherever they are
        // nonzero; zero bytes pass the base byte through unchanged.
        let literal = &rest[len_str.len().min(rest.len())..];
        let mut result = base_bytes.clone();
        for (i, &b) in literal.iter().enumerate() {
            if i < result.len() && b != 0 {
                result[i] = b;
            }
        }
        let _ = signed_len as usize; // length is informational for the substitute form
        result
    };

    out.extend_from_slice(&result);
    let ctx = table.get_mut(ctx_idx);
    ctx.set_last_txt_range(out.len() - result.len(), result.len());
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_redirection(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let other = parse_base64_dict_id(table, ctx_idx, snip.payload())?;
    // Reconstructing "that other context in full" means replaying its next
    // snip in its own dictionary — delegated back through the dispatcher.
    let next_snip = table.next_b250_snip(other)?;
    reconstruct_one_snip(table, other, next_snip, out)
}

fn reconstruct_dual(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
    luft_coords: bool,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    let mut parts = payload.splitn(2, |&b| b == SNIP_DUAL_SEP);
    let primary = parts.next().unwrap_or(&[]);
    let luft = parts.next().unwrap_or(&[]);
    let chosen = if luft_coords { luft } else { primary };
    reconstruct_one_snip(table, ctx_idx, Snip::new(chosen), out)
}

fn reconstruct_lookback(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let payload = snip.payload();
    let (lb_ctx_part, rest) = split_base64_prefix(payload);
    let lookback_ctx_idx = parse_base64_dict_id(table, ctx_idx, lb_ctx_part)?;
    let n = table.get(lookback_ctx_idx).last_value.as_int().unwrap_or(1).max(1) as usize;

    let bytes = table
        .lookback(ctx_idx)
        .and_then(|ring| ring.peek_txt(n))
        .ok_or_else(|| {
            EngineError::context_invariant(
                ErrorSite::new(),
                "LOOKBACK references a position with no recorded value",
                table.name(ctx_idx),
                None,
            )
        })?
        .to_vec();
    let _ = rest;
    out.extend_from_slice(&bytes);
    let ctx = table.get_mut(ctx_idx);
    ctx.set_last_txt_range(out.len() - bytes.len(), bytes.len());
    Ok(ReconstructOutcome::Wrote)
}

fn reconstruct_dont_store(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    let saved_store = table.get(ctx_idx).flags.store;
    let saved_delta = table.get(ctx_idx).flags.store_delta;
    table.get_mut(ctx_idx).flags.store = crate::context::StoreType::None;
    table.get_mut(ctx_idx).flags.store_delta = false;
    let outcome = reconstruct_one_snip(table, ctx_idx, Snip::new(snip.payload()), out);
    table.get_mut(ctx_idx).flags.store = saved_store;
    table.get_mut(ctx_idx).flags.store_delta = saved_delta;
    outcome
}

fn reconstruct_literal(
    table: &mut ContextTable,
    ctx_idx: usize,
    snip: Snip<'_>,
    out: &mut Vec<u8>,
) -> Result<ReconstructOutcome> {
    out.extend_from_slice(snip.bytes);
    let ctx = table.get_mut(ctx_idx);
    ctx.set_last_txt_range(out.len() - snip.bytes.len(), snip.bytes.len());
    match ctx.flags.store {
        crate::context::StoreType::Int => {
            if let Ok(n) = std::str::from_utf8(snip.bytes).unwrap_or("").parse::<i64>() {
                ctx.last_value = LastValue::Int(n);
            }
        }
        crate::context::StoreType::Float => {
            if let Ok(n) = std::str::from_utf8(snip.bytes).unwrap_or("").parse::<f64>() {
                ctx.last_value = LastValue::Float(n);
            }
        }
        _ => {}
    }
    Ok(ReconstructOutcome::Wrote)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Split an 11-byte base64-encoded `DictId` prefix from the remainder of a
/// payload (the suffix, e.g. an integer delta or length).
fn split_base64_prefix(payload: &[u8]) -> (&[u8], &[u8]) {
    let n = payload.iter().take_while(|&&b| is_base64_byte(b)).count().min(11);
    payload.split_at(n)
}

fn parse_base64_dict_id(table: &ContextTable, ctx_idx: usize, payload: &[u8]) -> Result<usize> {
    let s = std::str::from_utf8(payload).map_err(|_| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "snip payload is not valid UTF-8 where a base64 dict_id was expected",
            table.name(ctx_idx),
            None,
        )
    })?;
    let dict_id = DictId::from_base64(s).ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "snip payload base64 does not decode to a valid dict_id",
            table.name(ctx_idx),
            None,
        )
    })?;
    table.find(dict_id).ok_or_else(|| {
        EngineError::context_invariant(
            ErrorSite::new(),
            "snip references an unknown dict_id",
            table.name(ctx_idx),
            None,
        )
    })
}

/// Build the wire bytes for a `SELF_DELTA` snip.
pub fn encode_self_delta(delta: i64) -> Vec<u8> {
    let mut out = vec![SnipOp::SelfDelta as u8];
    out.extend_from_slice(delta.to_string().as_bytes());
    out
}

/// Build the wire bytes for a `COPY` snip (self or another context).
pub fn encode_copy(other: Option<DictId>) -> Vec<u8> {
    let mut out = vec![SnipOp::Copy as u8];
    if let Some(id) = other {
        out.extend_from_slice(id.to_base64().as_bytes());
    }
    out
}

/// Build the wire bytes for an `OTHER_DELTA` snip.
pub fn encode_other_delta(other: DictId, delta: i64) -> Vec<u8> {
    let mut out = vec![SnipOp::OtherDelta as u8];
    out.extend_from_slice(other.to_base64().as_bytes());
    out.extend_from_slice(delta.to_string().as_bytes());
    out
}

/// The pure `LOOKUP` snip singleton.
pub fn lookup_snip() -> Vec<u8> {
    vec![SnipOp::Lookup as u8]
}

/// Build the wire bytes for a `SPECIAL` MINUS snip: `a - b` computed from
/// two sibling contexts' `last_value` at reconstruction time.
pub fn encode_special_minus(a: DictId, b: DictId) -> Vec<u8> {
    let mut out = vec![SnipOp::Special as u8, SPECIAL_MINUS + 32];
    out.extend_from_slice(a.to_base64().as_bytes());
    out.extend_from_slice(b.to_base64().as_bytes());
    out
}

/// Build the wire bytes for a `LOOKBACK` snip: `dist_ctx`'s `last_value`
/// gives how many repeats back to reach into this context's own ring.
pub fn encode_lookback(dist_ctx: DictId) -> Vec<u8> {
    let mut out = vec![SnipOp::Lookback as u8];
    out.extend_from_slice(dist_ctx.to_base64().as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextTable, StoreType};
    use crate::dict_id::DictIdType;

    fn fresh_int_ctx(table: &mut ContextTable, name: &str) -> usize {
        let id = table.add_context(name, DictId::new(name.as_bytes(), DictIdType::Field));
        table.get_mut(id).flags.store = StoreType::Int;
        id
    }

    #[test]
    fn self_delta_zero_leaves_value_unchanged_and_emits_ascii() {
        let mut table = ContextTable::new();
        let pos = fresh_int_ctx(&mut table, "POS");
        table.get_mut(pos).last_value = LastValue::Int(100);
        let mut out = Vec::new();
        let snip = Snip::new(&encode_self_delta(0));
        reconstruct_one_snip(&mut table, pos, snip, &mut out).unwrap();
        assert_eq!(out, b"100");
        assert_eq!(table.get(pos).last_value.as_int(), Some(100));
    }

    #[test]
    fn self_delta_empty_negates_previous_delta() {
        let mut table = ContextTable::new();
        let pos = fresh_int_ctx(&mut table, "POS");
        table.get_mut(pos).last_value = LastValue::Int(100);
        let mut out = Vec::new();
        reconstruct_one_snip(&mut table, pos, Snip::new(&encode_self_delta(3)), &mut out).unwrap();
        assert_eq!(out, b"103");
        assert_eq!(table.get(pos).last_delta, Some(3));

        reconstruct_one_snip(&mut table, pos, Snip::new(&[SnipOp::SelfDelta as u8]), &mut out).unwrap();
        assert_eq!(&out[3..], b"100");
        assert_eq!(table.get(pos).last_delta, Some(-3));
    }

    #[test]
    fn copy_emits_bytes_identical_to_referenced_last_txt() {
        let mut table = ContextTable::new();
        let a = table.add_context("A", DictId::new(b"A", DictIdType::Field));
        let mut out = Vec::new();
        reconstruct_one_snip(&mut table, a, Snip::new(b"hello"), &mut out).unwrap();

        let b = table.add_context("B", DictId::new(b"B", DictIdType::Field));
        let dict_id_a = table.get(a).dict_id;
        reconstruct_one_snip(&mut table, b, Snip::new(&encode_copy(Some(dict_id_a))), &mut out).unwrap();
        assert_eq!(&out[5..], b"hello");
    }

    #[test]
    fn other_delta_requires_int_base() {
        let mut table = ContextTable::new();
        let base = table.add_context("BASE", DictId::new(b"BASE", DictIdType::Field));
        let dep = table.add_context("DEP", DictId::new(b"DEP", DictIdType::Field));
        let base_id = table.get(base).dict_id;
        let mut out = Vec::new();
        let err = reconstruct_one_snip(&mut table, dep, Snip::new(&encode_other_delta(base_id, 1)), &mut out)
            .unwrap_err();
        assert!(matches!(err, EngineError::ContextInvariant { .. }));
    }

    #[test]
    fn other_delta_equals_base_plus_delta() {
        let mut table = ContextTable::new();
        let base = fresh_int_ctx(&mut table, "BASE");
        table.get_mut(base).last_value = LastValue::Int(10);
        let dep = table.add_context("DEP", DictId::new(b"DEP", DictIdType::Field));
        let base_id = table.get(base).dict_id;
        let mut out = Vec::new();
        reconstruct_one_snip(&mut table, dep, Snip::new(&encode_other_delta(base_id, 5)), &mut out).unwrap();
        assert_eq!(out, b"15");
    }

    #[test]
    fn special_minus_subtracts_two_sibling_contexts() {
        let mut table = ContextTable::new();
        let end = fresh_int_ctx(&mut table, "END");
        table.get_mut(end).last_value = LastValue::Int(100);
        let start = fresh_int_ctx(&mut table, "START");
        table.get_mut(start).last_value = LastValue::Int(40);
        let size = table.add_context("SIZE", DictId::new(b"SIZE", DictIdType::Field));
        let end_id = table.get(end).dict_id;
        let start_id = table.get(start).dict_id;

        let mut out = Vec::new();
        reconstruct_one_snip(&mut table, size, Snip::new(&encode_special_minus(end_id, start_id)), &mut out).unwrap();
        assert_eq!(out, b"60");
        assert_eq!(table.get(size).last_value.as_int(), Some(60));
        assert_eq!(table.get(size).con_cache, vec![end, start]);
    }

    #[test]
    fn special_minus_caches_operands_after_first_resolution() {
        let mut table = ContextTable::new();
        let end = fresh_int_ctx(&mut table, "END");
        let start = fresh_int_ctx(&mut table, "START");
        let size = table.add_context("SIZE", DictId::new(b"SIZE", DictIdType::Field));
        let end_id = table.get(end).dict_id;
        let start_id = table.get(start).dict_id;
        let snip = encode_special_minus(end_id, start_id);

        table.get_mut(end).last_value = LastValue::Int(10);
        table.get_mut(start).last_value = LastValue::Int(3);
        let mut out = Vec::new();
        reconstruct_one_snip(&mut table, size, Snip::new(&snip), &mut out).unwrap();
        assert_eq!(out, b"7");

        // Second record: values moved on, but the cached operand pair is
        // reused without re-parsing the base64 payload.
        table.get_mut(end).last_value = LastValue::Int(20);
        table.get_mut(start).last_value = LastValue::Int(5);
        reconstruct_one_snip(&mut table, size, Snip::new(&snip), &mut out).unwrap();
        assert_eq!(&out[1..], b"15");
    }

    #[test]
    fn special_with_unknown_kind_errors() {
        let mut table = ContextTable::new();
        let ctx = table.add_context("X", DictId::new(b"X", DictIdType::Field));
        let snip = vec![SnipOp::Special as u8, 32 + 99];
        let mut out = Vec::new();
        let err = reconstruct_one_snip(&mut table, ctx, Snip::new(&snip), &mut out).unwrap_err();
        assert!(matches!(err, EngineError::ContextInvariant { .. }));
    }
}
