//! The section list: a file-level table of contents recording every
//! section's type, owning VB, dictionary identity, and absolute byte
//! offset/length. Written once per file, after every VB has been
//! compressed and appended under the writer lock, and is the last thing
//! read before reconstruction starts (via the trailing
//! [`crate::format::GenozipHeader`]'s offset).
//!
//! Encoding favors the common case — entries for the same VB-ordered
//! dictionaries, in the same relative order, recurring every VB — with
//! three redundancy-removing tricks: VB index delta + zigzag, byte offset
//! delta + varint, and dict_id written in full only the first time it's
//! seen (repeats point back at "same as last").

use crate::dict_id::DictId;
use crate::error::{EngineError, ErrorSite, Result};
use crate::format::SectionType;

#[derive(Debug, Clone)]
pub struct SectionEnt {
    pub section_type: SectionType,
    pub vblock_i: u32,
    /// `None` for sections with no associated dict_id (`TxtHeader`,
    /// `VbHeader`, `SectionList`, `GenozipHeader`).
    pub dict_id: Option<DictId>,
    pub offset: u64,
    pub len: u32,
}

/// Append-only, append-under-lock table of every section written so far.
/// The writer (see `gencomp.rs`/`pipeline.rs`) holds a single mutex around
/// this structure — it is the one piece of state every compute thread
/// must serialize through.
#[derive(Debug, Clone, Default)]
pub struct SectionList {
    entries: Vec<SectionEnt>,
}

impl SectionList {
    pub fn new() -> Self {
        SectionList::default()
    }

    pub fn push(&mut self, entry: SectionEnt) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionEnt> {
        self.entries.iter()
    }

    /// Find every section belonging to `vblock_i`, in the order they were
    /// appended (which is also their on-disk order).
    pub fn for_vb(&self, vblock_i: u32) -> impl Iterator<Item = &SectionEnt> {
        self.entries.iter().filter(move |e| e.vblock_i == vblock_i)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.entries.len() as u64);

        let mut last_vb: i64 = 0;
        let mut last_offset: u64 = 0;
        let mut last_dict_id: Option<u64> = None;

        for e in &self.entries {
            out.push(e.section_type as u8);

            let vb_delta = e.vblock_i as i64 - last_vb;
            write_zigzag(&mut out, vb_delta);
            last_vb = e.vblock_i as i64;

            let offset_delta = e.offset.checked_sub(last_offset).expect("section list offsets must be non-decreasing");
            write_varint(&mut out, offset_delta);
            last_offset = e.offset;

            write_varint(&mut out, e.len as u64);

            match e.dict_id {
                None => out.push(0),
                Some(id) if Some(id.as_u64()) == last_dict_id => out.push(2),
                Some(id) => {
                    out.push(1);
                    out.extend_from_slice(&id.as_u64().to_le_bytes());
                    last_dict_id = Some(id.as_u64());
                }
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let count = read_varint(&mut cursor)? as usize;

        let mut entries = Vec::with_capacity(count);
        let mut last_vb: i64 = 0;
        let mut last_offset: u64 = 0;
        let mut last_dict_id: Option<u64> = None;

        for _ in 0..count {
            let section_type = SectionType::from_u8(take_u8(&mut cursor)?)?;

            let vb_delta = read_zigzag(&mut cursor)?;
            last_vb += vb_delta;
            let vblock_i = u32::try_from(last_vb).map_err(|_| {
                EngineError::format(ErrorSite::new(), "section list vblock_i delta underflowed", String::new())
            })?;

            let offset_delta = read_varint(&mut cursor)?;
            last_offset += offset_delta;

            let len = read_varint(&mut cursor)? as u32;

            let dict_tag = take_u8(&mut cursor)?;
            let dict_id = match dict_tag {
                0 => None,
                1 => {
                    let id = take_u64(&mut cursor)?;
                    last_dict_id = Some(id);
                    Some(DictId::from_u64(id))
                }
                2 => Some(DictId::from_u64(last_dict_id.ok_or_else(|| {
                    EngineError::format(ErrorSite::new(), "section list dict_id back-reference with no prior entry", String::new())
                })?)),
                other => {
                    return Err(EngineError::format(
                        ErrorSite::new(),
                        format!("unknown section list dict_id tag {other}"),
                        String::new(),
                    ))
                }
            };

            entries.push(SectionEnt {
                section_type,
                vblock_i,
                dict_id,
                offset: last_offset,
                len,
            });
        }

        Ok(SectionList { entries })
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = take_u8(cursor)?;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(EngineError::format(ErrorSite::new(), "varint too long", String::new()));
        }
    }
}

fn write_zigzag(out: &mut Vec<u8>, value: i64) {
    let zigzag = ((value << 1) ^ (value >> 63)) as u64;
    write_varint(out, zigzag);
}

fn read_zigzag(cursor: &mut &[u8]) -> Result<i64> {
    let zigzag = read_varint(cursor)?;
    Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}

fn take_u8(cursor: &mut &[u8]) -> Result<u8> {
    if cursor.is_empty() {
        return Err(EngineError::format(ErrorSite::new(), "section list truncated", String::new()));
    }
    let b = cursor[0];
    *cursor = &cursor[1..];
    Ok(b)
}

fn take_u64(cursor: &mut &[u8]) -> Result<u64> {
    if cursor.len() < 8 {
        return Err(EngineError::format(ErrorSite::new(), "section list truncated reading dict_id", String::new()));
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&cursor[..8]);
    *cursor = &cursor[8..];
    Ok(u64::from_le_bytes(arr))
}
