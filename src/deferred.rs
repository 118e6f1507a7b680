//! Deferred insertions: reserve a placeholder span in the reconstruction
//! buffer now, fill it in later once a value that depends on *downstream*
//! data (e.g. VCF INFO/DP, computed as the sum of every sample's
//! FORMAT/DP) becomes known.
//!
//! Modeled as an explicit queue of `(ctx, placeholder_start, reserved_len)`
//! records rather than coroutines or re-entrant callbacks: `reserve` grows
//! the buffer and remembers where; `insert_field` writes the real value,
//! `memmove`-ing the remainder of the buffer when the value's length
//! differs from what was reserved, and fixing up every other pending
//! slot's recorded offset so later `insert_field` calls still land in the
//! right place.

use crate::error::{EngineError, ErrorSite, Result};

#[derive(Debug, Clone, Copy)]
struct DeferredSlot {
    ctx_idx: usize,
    placeholder_start: usize,
    reserved_len: usize,
    filled: bool,
}

/// An opaque handle to a single reservation, returned by [`DeferredQueue::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredHandle(usize);

/// The per-VB queue of pending placeholder fill-ins.
#[derive(Debug, Clone, Default)]
pub struct DeferredQueue {
    slots: Vec<DeferredSlot>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        DeferredQueue::default()
    }

    /// Reserve `reserved_len` bytes at the current end of `out`, filled
    /// with `fill_byte` as a placeholder, and remember the reservation
    /// under a returned handle.
    pub fn reserve(&mut self, out: &mut Vec<u8>, ctx_idx: usize, reserved_len: usize, fill_byte: u8) -> DeferredHandle {
        let placeholder_start = out.len();
        out.resize(placeholder_start + reserved_len, fill_byte);
        let handle = DeferredHandle(self.slots.len());
        self.slots.push(DeferredSlot {
            ctx_idx,
            placeholder_start,
            reserved_len,
            filled: false,
        });
        handle
    }

    /// Fill a previously reserved placeholder with `value`. If `value`'s
    /// length differs from what was reserved, the remainder of `out` is
    /// shifted (`Vec::splice`'s underlying `memmove`) and every other
    /// slot's recorded start offset past this one is corrected by the
    /// resulting delta.
    pub fn insert_field(&mut self, out: &mut Vec<u8>, handle: DeferredHandle, value: &[u8]) -> Result<()> {
        let slot = *self.slots.get(handle.0).ok_or_else(|| {
            EngineError::resource(ErrorSite::new(), "deferred insertion handle is out of range")
        })?;
        if slot.filled {
            return Err(EngineError::resource(
                ErrorSite::new(),
                "deferred insertion slot already filled",
            ));
        }

        let delta = value.len() as isize - slot.reserved_len as isize;
        let range = slot.placeholder_start..slot.placeholder_start + slot.reserved_len;
        if delta == 0 {
            out[range].copy_from_slice(value);
        } else {
            out.splice(range, value.iter().copied());
            for other in self.slots.iter_mut() {
                if other.placeholder_start > slot.placeholder_start {
                    other.placeholder_start = (other.placeholder_start as isize + delta) as usize;
                }
            }
        }

        let entry = &mut self.slots[handle.0];
        entry.reserved_len = value.len();
        entry.filled = true;
        Ok(())
    }

    /// The context a given handle's reservation belongs to, used by the
    /// caller to know which context's summed value to compute.
    pub fn ctx_of(&self, handle: DeferredHandle) -> Option<usize> {
        self.slots.get(handle.0).map(|s| s.ctx_idx)
    }

    /// `true` once every reservation in the queue has been filled — the
    /// caller uses this to assert no placeholder survives to the final
    /// output.
    pub fn all_filled(&self) -> bool {
        self.slots.iter().all(|s| s.filled)
    }

    pub fn pending(&self) -> impl Iterator<Item = DeferredHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.filled)
            .map(|(i, _)| DeferredHandle(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_insert_same_length_is_a_plain_overwrite() {
        let mut out = b"DP=".to_vec();
        let mut queue = DeferredQueue::new();
        let handle = queue.reserve(&mut out, 0, 3, b' ');
        assert_eq!(out, b"DP=   ");
        queue.insert_field(&mut out, handle, b"042").unwrap();
        assert_eq!(out, b"DP=042");
        assert!(queue.all_filled());
    }

    #[test]
    fn insert_field_shrinking_shifts_trailing_bytes() {
        let mut out = b"DP=".to_vec();
        let mut queue = DeferredQueue::new();
        let handle = queue.reserve(&mut out, 0, 5, b' ');
        out.extend_from_slice(b";AF=0.5");
        queue.insert_field(&mut out, handle, b"7").unwrap();
        assert_eq!(out, b"DP=7;AF=0.5");
    }

    #[test]
    fn insert_field_growing_shifts_trailing_bytes_and_fixes_up_siblings() {
        let mut out = Vec::new();
        let mut queue = DeferredQueue::new();
        let dp_handle = queue.reserve(&mut out, 0, 2, b' ');
        out.extend_from_slice(b";");
        let af_handle = queue.reserve(&mut out, 1, 3, b' ');
        out.extend_from_slice(b";END");

        queue.insert_field(&mut out, dp_handle, b"12345").unwrap();
        // AF's placeholder must have shifted right by (5 - 2) = 3 bytes.
        queue.insert_field(&mut out, af_handle, b"0.1").unwrap();

        assert_eq!(out, b"12345;0.1;END");
    }

    #[test]
    fn double_fill_is_rejected() {
        let mut out = b"x".to_vec();
        let mut queue = DeferredQueue::new();
        let handle = queue.reserve(&mut out, 0, 1, b' ');
        queue.insert_field(&mut out, handle, b"1").unwrap();
        let err = queue.insert_field(&mut out, handle, b"2").unwrap_err();
        assert!(matches!(err, EngineError::Resource { .. }));
    }
}
