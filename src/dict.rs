//! Per-context dictionary: the de-duplicated pool of distinct snip byte
//! strings a context's b250 word-index stream refers into.
//!
//! Entries are concatenated NUL-separated, matching the on-disk `dict.b`
//! section layout, so a loaded dictionary never needs re-encoding before
//! being written back out unchanged.

use std::collections::HashMap;

/// A single interned dictionary: concatenated snip bytes plus a dedup index
/// and per-word `(start, len)` spans.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    bytes: Vec<u8>,
    spans: Vec<(usize, usize)>,
    index: HashMap<Vec<u8>, u32>,
}

/// Opaque snapshot of a [`Dict`]'s size, for rollback after a line is
/// rejected mid-segmentation.
#[derive(Debug, Clone, Copy)]
pub struct DictSnapshot {
    bytes_len: usize,
    spans_len: usize,
}

impl Dict {
    pub fn new() -> Self {
        Dict::default()
    }

    /// Intern `snip`, returning its word index. Byte-identical snips always
    /// dedup to the same index — this is the only place a new word index
    /// is minted.
    pub fn intern(&mut self, snip: &[u8]) -> u32 {
        if let Some(&idx) = self.index.get(snip) {
            return idx;
        }
        let idx = self.spans.len() as u32;
        let start = self.bytes.len();
        self.bytes.extend_from_slice(snip);
        self.bytes.push(0);
        self.spans.push((start, snip.len()));
        self.index.insert(snip.to_vec(), idx);
        idx
    }

    pub fn get(&self, word_index: u32) -> &[u8] {
        let (start, len) = self.spans[word_index as usize];
        &self.bytes[start..start + len]
    }

    pub fn len_words(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Raw NUL-separated concatenation, as written to the `dict.b` section.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Rebuild from the on-disk NUL-separated form.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut dict = Dict::new();
        let mut start = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if b == 0 {
                dict.intern(&bytes[start..i]);
                start = i + 1;
            }
        }
        dict
    }

    pub fn snapshot(&self) -> DictSnapshot {
        DictSnapshot {
            bytes_len: self.bytes.len(),
            spans_len: self.spans.len(),
        }
    }

    /// Undo every `intern` call since `snapshot` was taken, including
    /// removing the dedup-index entries the undone words created.
    pub fn rollback(&mut self, snapshot: DictSnapshot) {
        for i in snapshot.spans_len..self.spans.len() {
            let (start, len) = self.spans[i];
            let word = self.bytes[start..start + len].to_vec();
            self.index.remove(&word);
        }
        self.spans.truncate(snapshot.spans_len);
        self.bytes.truncate(snapshot.bytes_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_snips_dedup_to_same_index() {
        let mut dict = Dict::new();
        let a = dict.intern(b"PASS");
        let b = dict.intern(b"PASS");
        assert_eq!(a, b);
        assert_eq!(dict.len_words(), 1);
    }

    #[test]
    fn distinct_snips_get_distinct_indices() {
        let mut dict = Dict::new();
        let a = dict.intern(b"PASS");
        let b = dict.intern(b"q10");
        assert_ne!(a, b);
        assert_eq!(dict.get(a), b"PASS");
        assert_eq!(dict.get(b), b"q10");
    }

    #[test]
    fn from_bytes_roundtrips_through_as_bytes() {
        let mut dict = Dict::new();
        dict.intern(b"A");
        dict.intern(b"B");
        dict.intern(b"CC");
        let reloaded = Dict::from_bytes(dict.as_bytes());
        assert_eq!(reloaded.len_words(), 3);
        assert_eq!(reloaded.get(0), b"A");
        assert_eq!(reloaded.get(1), b"B");
        assert_eq!(reloaded.get(2), b"CC");
    }

    #[test]
    fn rollback_undoes_interns_and_their_dedup_entries() {
        let mut dict = Dict::new();
        dict.intern(b"A");
        let snap = dict.snapshot();
        dict.intern(b"B");
        dict.intern(b"C");
        assert_eq!(dict.len_words(), 3);
        dict.rollback(snap);
        assert_eq!(dict.len_words(), 1);
        // B can be re-interned fresh (not seen as a dup of the rolled-back entry).
        let b_again = dict.intern(b"B");
        assert_eq!(b_again, 1);
    }
}
