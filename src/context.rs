//! The `Context` — one named stream's dictionary, b250 word-index, and
//! local buffer — and the `ContextTable` that owns every context in a
//! variant block, keyed by [`DictId`].
//!
//! This is the Seg/Piz shared core: Seg appends to a context as it reads
//! records; Piz replays a context's `b250` stream against its `dict` and
//! `local` to reconstruct the original text. Both sides share the same
//! `last_value`/`last_txt`/lookback bookkeeping so delta and copy opcodes
//! mean the same thing on either path.

use std::collections::HashMap;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::dict::{Dict, DictSnapshot};
use crate::dict_id::DictId;
use crate::error::{EngineError, ErrorSite, Result};
use crate::lookback::LookbackRing;

/// One decoded b250 stream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum B250Entry {
    Word(u32),
    /// Word index equal to the previous entry's index + 1 — the common
    /// case of a freshly-interned run, compressed to a single marker byte.
    OneUp,
    /// The field was present but zero-length.
    Empty,
    /// The field was absent entirely (container item not supplied).
    Missing,
}

/// What a context's `local` buffer is, and how wide each record is when
/// the type is fixed-width binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalType {
    /// Newline-separated text entries.
    Text,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Hex8,
    Hex16,
    Hex32,
    Hex64,
    Float32,
    Float64,
    /// 2-bit-packed ACGT sequence data; see `codec::acgt`.
    Sequence,
    /// Packed bit flags, one bit per record.
    Bitmap,
    /// Opaque bytes with no further typed structure.
    Blob,
    /// Already-compressed bytes handed to a named codec verbatim.
    Codec,
}

impl LocalType {
    fn fixed_width(self) -> Option<usize> {
        match self {
            LocalType::Int8 | LocalType::Uint8 | LocalType::Hex8 => Some(1),
            LocalType::Int16 | LocalType::Uint16 | LocalType::Hex16 => Some(2),
            LocalType::Int32 | LocalType::Uint32 | LocalType::Hex32 | LocalType::Float32 => Some(4),
            LocalType::Int64 | LocalType::Uint64 | LocalType::Hex64 | LocalType::Float64 => Some(8),
            LocalType::Text | LocalType::Sequence | LocalType::Bitmap | LocalType::Blob | LocalType::Codec => None,
        }
    }
}

/// Encode a context's full `b250` stream for its on-disk `B250` section:
/// one tag byte per entry (`0`=Missing, `1`=Empty, `2`=OneUp, `3`=Word),
/// `Word` followed by a varint — the same delta/varint framing `section.rs`
/// uses for its own table, reused here since a b250 stream is just another
/// append-only sequence of small integers.
pub fn encode_b250(entries: &[B250Entry]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, entries.len() as u64);
    for entry in entries {
        match entry {
            B250Entry::Missing => out.push(0),
            B250Entry::Empty => out.push(1),
            B250Entry::OneUp => out.push(2),
            B250Entry::Word(w) => {
                out.push(3);
                write_varint(&mut out, *w as u64);
            }
        }
    }
    out
}

pub fn decode_b250(bytes: &[u8]) -> Result<Vec<B250Entry>> {
    let mut cursor = bytes;
    let count = read_varint(&mut cursor)? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (&tag, rest) = cursor
            .split_first()
            .ok_or_else(|| EngineError::resource(ErrorSite::new(), "b250 stream truncated mid-entry"))?;
        cursor = rest;
        entries.push(match tag {
            0 => B250Entry::Missing,
            1 => B250Entry::Empty,
            2 => B250Entry::OneUp,
            3 => B250Entry::Word(read_varint(&mut cursor)? as u32),
            other => return Err(EngineError::resource(ErrorSite::new(), format!("unknown b250 tag byte {other}"))),
        });
    }
    Ok(entries)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or_else(|| EngineError::resource(ErrorSite::new(), "varint truncated in b250 stream"))?;
        *cursor = rest;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// A context's auxiliary byte buffer — numeric series, raw text overflow,
/// or a typed binary series, depending on `ltype`.
#[derive(Debug, Clone)]
pub struct LocalBuf {
    pub ltype: Option<LocalType>,
    pub bytes: Vec<u8>,
    /// Free-form per-type parameter (e.g. a lookback ring's capacity).
    pub param: u32,
}

impl Default for LocalBuf {
    fn default() -> Self {
        LocalBuf {
            ltype: None,
            bytes: Vec::new(),
            param: 0,
        }
    }
}

impl LocalBuf {
    pub fn set_type(&mut self, ltype: LocalType) {
        self.ltype = Some(ltype);
    }

    pub fn push_text(&mut self, text: &[u8]) {
        self.ltype.get_or_insert(LocalType::Text);
        self.bytes.extend_from_slice(text);
        self.bytes.push(b'\n');
    }

    pub fn push_int(&mut self, value: i64) {
        let ltype = *self.ltype.get_or_insert(LocalType::Int64);
        match ltype.fixed_width() {
            Some(1) => self.bytes.push(value as u8),
            Some(2) => self.bytes.write_i16::<LittleEndian>(value as i16).unwrap(),
            Some(4) => self.bytes.write_i32::<LittleEndian>(value as i32).unwrap(),
            _ => self.bytes.write_i64::<LittleEndian>(value).unwrap(),
        }
    }

    pub fn read_next_as_text(&self, cursor: &mut usize) -> Result<Vec<u8>> {
        if *cursor >= self.bytes.len() {
            return Err(EngineError::resource(ErrorSite::new(), "local buffer exhausted reading TEXT"));
        }
        let rest = &self.bytes[*cursor..];
        let nl = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let text = rest[..nl].to_vec();
        *cursor += nl + 1;
        Ok(text)
    }

    pub fn read_next_as_int(&self, cursor: &mut usize) -> Result<i64> {
        let width = self.ltype.and_then(LocalType::fixed_width).unwrap_or(8);
        if *cursor + width > self.bytes.len() {
            return Err(EngineError::resource(ErrorSite::new(), "local buffer exhausted reading NUMERIC"));
        }
        let mut slice = &self.bytes[*cursor..*cursor + width];
        let v = match width {
            1 => slice.read_u8().unwrap() as i64,
            2 => slice.read_i16::<LittleEndian>().unwrap() as i64,
            4 => slice.read_i32::<LittleEndian>().unwrap() as i64,
            _ => slice.read_i64::<LittleEndian>().unwrap(),
        };
        *cursor += width;
        Ok(v)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// What a context's value should be materialized as for delta/arithmetic
/// opcodes, independent of how it's stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    #[default]
    None,
    Int,
    Float,
    /// Store the b250 word index itself as the "value" (used by contexts
    /// that other contexts redirect through rather than delta against).
    Index,
}

impl StoreType {
    pub fn is_int(self) -> bool {
        matches!(self, StoreType::Int)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextFlags {
    pub store: StoreType,
    pub store_per_line: bool,
    pub store_delta: bool,
    pub paired: bool,
    pub all_the_same: bool,
    pub spl_custom: bool,
    /// `Some(capacity)` marks this context as one whose own reconstructed
    /// values feed its [`LookbackRing`](crate::lookback::LookbackRing) —
    /// set for per-sample fields a `LOOKBACK` snip elsewhere in the same
    /// context addresses by "how many repeats ago". `None` is the common
    /// case: most contexts never get looked back into, and pay nothing.
    pub lookback_capacity: Option<usize>,
}

/// The last materialized value of a context, used as the delta/copy base
/// for the *next* record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LastValue {
    #[default]
    None,
    Int(i64),
    Float(f64),
}

impl LastValue {
    pub fn as_int(self) -> Option<i64> {
        match self {
            LastValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            LastValue::Float(v) => Some(v),
            LastValue::Int(v) => Some(v as f64),
            LastValue::None => None,
        }
    }
}

/// Opaque snapshot of a context's reconstruction cursor (b250 position,
/// local-buffer position, and value registers), for the peek/restore
/// scopes in `peek.rs`. Deliberately narrower than [`RollbackPoint`] — it
/// never touches `dict` or `singleton_count`, since peeking ahead during
/// reconstruction never interns anything new.
#[derive(Debug, Clone, Copy)]
pub struct CursorSnapshot {
    b250_cursor: usize,
    last_b250_word: Option<u32>,
    next_local: usize,
    last_value: LastValue,
    last_delta: Option<i64>,
    last_txt: Option<(usize, usize)>,
}

/// Opaque snapshot of a context's mutable state, for rollback when a line
/// is rejected mid-segmentation (e.g. a container item fails validation
/// after several sibling contexts already appended).
#[derive(Debug, Clone)]
pub struct RollbackPoint {
    b250_len: usize,
    dict_snapshot: DictSnapshot,
    local_len: usize,
    last_value: LastValue,
    last_delta: Option<i64>,
    last_txt: Option<(usize, usize)>,
    last_b250_word: Option<u32>,
    singleton_count: u32,
    not_all_the_same: bool,
}

/// One named stream: `CHROM`, `POS`, `INFO/DP`, `FORMAT/GT`, and so on.
#[derive(Debug, Clone)]
pub struct Context {
    pub dict_id: DictId,
    pub name: String,
    pub dict: Dict,
    pub b250: Vec<B250Entry>,
    pub local: LocalBuf,
    pub next_local: usize,
    pub flags: ContextFlags,
    pub last_value: LastValue,
    pub last_delta: Option<i64>,
    /// `(start, len)` into the *reconstruction output buffer* of this
    /// context's most recently written text — not into `dict` or `local`,
    /// since COPY/DIFF need the literal rendered bytes, not the snip.
    pub last_txt: Option<(usize, usize)>,
    pub last_line_i: u32,
    pub singleton_count: u32,
    /// Flips permanently to `true` the first time this context appends a
    /// delta-shaped snip (`SELF_DELTA`/`OTHER_DELTA`), never on a plain
    /// repeated or divergent lookup. A context whose values happen to
    /// repeat across several delta-encoded lines is still "not all the
    /// same" under this rule — the check is about encoding shape, not
    /// about whether the materialized values ever differ.
    pub not_all_the_same: bool,
    last_b250_word: Option<u32>,
    b250_cursor: usize,
    pub numeric_only: bool,
    pub lookback: Option<LookbackRing>,
    /// VB-scoped memoization of sibling context indices a `SPECIAL` snip
    /// resolved once (e.g. MINUS's two base64-encoded operand dict_ids) —
    /// resolved lazily on the first invocation, then reused on every
    /// subsequent one without re-parsing the payload.
    pub con_cache: Vec<usize>,
}

impl Context {
    pub fn new(name: &str, dict_id: DictId) -> Self {
        Context {
            dict_id,
            name: name.to_string(),
            dict: Dict::new(),
            b250: Vec::new(),
            local: LocalBuf::default(),
            next_local: 0,
            flags: ContextFlags::default(),
            last_value: LastValue::None,
            last_delta: None,
            last_txt: None,
            last_line_i: 0,
            singleton_count: 0,
            not_all_the_same: false,
            last_b250_word: None,
            b250_cursor: 0,
            numeric_only: true,
            lookback: None,
            con_cache: Vec::new(),
        }
    }

    /// Rebuild a context from its decoded on-disk streams, for the Piz
    /// side: `dict`/`b250`/`local` arrive already populated from their
    /// sections, the cursor and value registers start fresh.
    pub fn from_decoded(name: &str, dict_id: DictId, dict: Dict, b250: Vec<B250Entry>, local: LocalBuf) -> Self {
        let mut ctx = Context::new(name, dict_id);
        ctx.dict = dict;
        ctx.b250 = b250;
        ctx.local = local;
        ctx
    }

    fn push_b250_word(&mut self, word: u32) {
        let is_one_up = self.last_b250_word == Some(word.wrapping_sub(1)) && word as usize + 1 == self.dict.len_words();
        self.b250.push(if is_one_up { B250Entry::OneUp } else { B250Entry::Word(word) });
        self.last_b250_word = Some(word);
    }

    /// Flip `not_all_the_same` permanently. Called whenever a delta-shaped
    /// snip (`SELF_DELTA`/`OTHER_DELTA`) is appended to this context.
    pub fn observe_delta(&mut self) {
        self.not_all_the_same = true;
    }

    /// Intern `snip` and append a b250 entry pointing to it.
    pub fn append_snip(&mut self, snip: &[u8]) -> u32 {
        if !Self::is_pure_lookup(snip) && std::str::from_utf8(snip).ok().and_then(|s| s.parse::<i64>().ok()).is_none() {
            self.numeric_only = false;
        }
        if Self::is_pure_lookup(snip) {
            self.singleton_count += 1;
        }
        if matches!(
            snip.first(),
            Some(&b) if b == crate::snip::SnipOp::SelfDelta as u8 || b == crate::snip::SnipOp::OtherDelta as u8
        ) {
            self.observe_delta();
        }
        let word = self.dict.intern(snip);
        self.push_b250_word(word);
        word
    }

    fn is_pure_lookup(snip: &[u8]) -> bool {
        snip.len() == 1 && snip[0] == crate::snip::SnipOp::Lookup as u8
    }

    /// Append a b250 entry reusing an already-known word index (for items
    /// segmented once and re-emitted, e.g. from a peek/restore).
    pub fn append_known_index(&mut self, word: u32) {
        self.push_b250_word(word);
    }

    pub fn append_empty(&mut self) {
        self.b250.push(B250Entry::Empty);
    }

    pub fn append_missing(&mut self) {
        self.b250.push(B250Entry::Missing);
    }

    pub fn append_integer(&mut self, value: i64) {
        self.flags.store = StoreType::Int;
        self.local.push_int(value);
        self.last_value = LastValue::Int(value);
    }

    pub fn append_float(&mut self, value: f64, verbatim_text: &[u8]) {
        self.flags.store = StoreType::Float;
        self.local.push_text(verbatim_text);
        self.last_value = LastValue::Float(value);
    }

    pub fn append_text_to_local(&mut self, text: &[u8]) {
        self.local.push_text(text);
    }

    pub fn set_last_txt_range(&mut self, start: usize, len: usize) {
        self.last_txt = Some((start, len));
    }

    pub fn last_txt_bytes<'a>(&self, out: &'a [u8], start: usize, len: usize) -> &'a [u8] {
        &out[start..start + len]
    }

    fn b250_cursor_next(&mut self) -> Result<B250Entry> {
        if self.b250_cursor >= self.b250.len() {
            return Err(EngineError::resource(ErrorSite::new(), "b250 stream exhausted"));
        }
        let entry = self.b250[self.b250_cursor];
        self.b250_cursor += 1;
        if let B250Entry::Word(w) = entry {
            self.last_b250_word = Some(w);
        } else if let B250Entry::OneUp = entry {
            self.last_b250_word = self.last_b250_word.map(|w| w + 1);
        }
        Ok(entry)
    }

    pub fn cursor_snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            b250_cursor: self.b250_cursor,
            last_b250_word: self.last_b250_word,
            next_local: self.next_local,
            last_value: self.last_value,
            last_delta: self.last_delta,
            last_txt: self.last_txt,
        }
    }

    pub fn restore_cursor(&mut self, snap: CursorSnapshot) {
        self.b250_cursor = snap.b250_cursor;
        self.last_b250_word = snap.last_b250_word;
        self.next_local = snap.next_local;
        self.last_value = snap.last_value;
        self.last_delta = snap.last_delta;
        self.last_txt = snap.last_txt;
    }

    pub fn ensure_lookback(&mut self, capacity: usize) -> &mut LookbackRing {
        self.lookback.get_or_insert_with(|| LookbackRing::new(capacity))
    }

    pub fn snapshot(&self) -> RollbackPoint {
        RollbackPoint {
            b250_len: self.b250.len(),
            dict_snapshot: self.dict.snapshot(),
            local_len: self.local.bytes.len(),
            last_value: self.last_value,
            last_delta: self.last_delta,
            last_txt: self.last_txt,
            last_b250_word: self.last_b250_word,
            singleton_count: self.singleton_count,
            not_all_the_same: self.not_all_the_same,
        }
    }

    pub fn rollback(&mut self, point: RollbackPoint) {
        self.b250.truncate(point.b250_len);
        self.dict.rollback(point.dict_snapshot);
        self.local.bytes.truncate(point.local_len);
        self.last_value = point.last_value;
        self.last_delta = point.last_delta;
        self.last_txt = point.last_txt;
        self.last_b250_word = point.last_b250_word;
        self.singleton_count = point.singleton_count;
        self.not_all_the_same = point.not_all_the_same;
    }
}

/// Owns every [`Context`] in a variant block, keyed by [`DictId`]. Indices
/// into `contexts` are stable for the lifetime of the table — they are
/// what `usize` context handles mean throughout `snip`/`container`.
#[derive(Debug, Clone, Default)]
pub struct ContextTable {
    contexts: Vec<Context>,
    by_dict_id: HashMap<u64, usize>,
}

impl ContextTable {
    pub fn new() -> Self {
        ContextTable::default()
    }

    /// Get-or-create the context for `dict_id`, naming it `name` the first
    /// time it's created.
    pub fn add_context(&mut self, name: &str, dict_id: DictId) -> usize {
        if let Some(&idx) = self.by_dict_id.get(&dict_id.as_u64()) {
            return idx;
        }
        let idx = self.contexts.len();
        self.contexts.push(Context::new(name, dict_id));
        self.by_dict_id.insert(dict_id.as_u64(), idx);
        idx
    }

    pub fn get(&self, idx: usize) -> &Context {
        &self.contexts[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Context {
        &mut self.contexts[idx]
    }

    pub fn name(&self, idx: usize) -> String {
        self.contexts[idx].name.clone()
    }

    pub fn find(&self, dict_id: DictId) -> Option<usize> {
        self.by_dict_id.get(&dict_id.as_u64()).copied()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn lookback(&self, idx: usize) -> Option<&LookbackRing> {
        self.contexts[idx].lookback.as_ref()
    }

    pub fn cursor_snapshot(&self, idx: usize) -> CursorSnapshot {
        self.contexts[idx].cursor_snapshot()
    }

    pub fn restore_cursor(&mut self, idx: usize, snap: CursorSnapshot) {
        self.contexts[idx].restore_cursor(snap);
    }

    /// Advance `idx`'s b250 cursor by one and return the owned snip bytes
    /// it resolves to. Used by `REDIRECTION`, which must reconstruct
    /// another context's *next pending* value in that context's own
    /// stream rather than referencing an already-materialized one.
    pub fn next_b250_snip(&mut self, idx: usize) -> Result<Vec<u8>> {
        let ctx = self.get_mut(idx);
        let entry = ctx.b250_cursor_next()?;
        match entry {
            B250Entry::Word(w) => Ok(ctx.dict.get(w).to_vec()),
            B250Entry::OneUp => {
                let w = ctx.last_b250_word.ok_or_else(|| {
                    EngineError::context_invariant(ErrorSite::new(), "ONE_UP with no prior word", ctx.name.clone(), None)
                })?;
                Ok(ctx.dict.get(w).to_vec())
            }
            B250Entry::Empty => Ok(Vec::new()),
            B250Entry::Missing => Err(EngineError::context_invariant(
                ErrorSite::new(),
                "REDIRECTION target's next b250 entry is MISSING",
                ctx.name.clone(),
                None,
            )),
        }
    }
}
