//! The generated-component router: absorbs out-of-band (OOB) and
//! dependent (DEPN) lines discovered mid-segmentation of MAIN variant
//! blocks, batches them into VBs of the target size, and hands them back
//! to the dispatcher in a fixed order.
//!
//! Modeled as one plain struct with no internal locking — the single
//! mutex this router needs is held by its caller (`pipeline.rs`), the
//! same division of labor this crate's writer-mutex-protected finalize
//! path used: one piece of shared state, one lock, callers serialize
//! through it rather than the struct serializing itself.
//!
//! Queue slots are a fixed-capacity `Vec<Option<QueueSlot>>` with an
//! explicit free-list stack and an in-use `VecDeque` (front = oldest) —
//! the same shape as an intrusive free-list/in-use doubly-linked queue,
//! without the unsafe pointer chasing.

use std::collections::VecDeque;

use crate::codec::generic::ZstdCodec;
use crate::codec::Codec;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GencompKind {
    Oob,
    Depn,
}

#[derive(Debug, Clone, Default)]
struct ComponentAccum {
    bytes: Vec<u8>,
    num_lines: u32,
    comp_i: u32,
}

#[derive(Debug, Clone)]
pub struct QueueSlot {
    pub bytes: Vec<u8>,
    pub num_lines: u32,
    pub comp_i: u32,
}

#[derive(Debug)]
struct SlotQueue {
    slots: Vec<Option<QueueSlot>>,
    free: Vec<usize>,
    in_use: VecDeque<usize>,
}

impl SlotQueue {
    fn with_capacity(n: usize) -> Self {
        SlotQueue {
            slots: (0..n).map(|_| None).collect(),
            free: (0..n).rev().collect(),
            in_use: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }

    fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    fn try_push(&mut self, slot: QueueSlot) -> bool {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                self.in_use.push_back(i);
                true
            }
            None => false,
        }
    }

    fn pop_oldest(&mut self) -> Option<QueueSlot> {
        let i = self.in_use.pop_front()?;
        let slot = self.slots[i].take();
        self.free.push(i);
        slot
    }
}

/// A batch of DEPN lines diverted to scratch storage because the DEPN
/// queue was full when it needed flushing. Kept compressed in memory
/// rather than actually spilled to a scratch file — a real deployment
/// would write these to disk, but nothing downstream of this router
/// depends on that detail.
#[derive(Debug, Clone)]
pub struct OffloadRecord {
    pub compressed: Vec<u8>,
    pub uncompressed_len: usize,
    pub num_lines: u32,
    pub comp_i: u32,
}

impl OffloadRecord {
    pub fn decompress(&self) -> Result<Vec<u8>> {
        ZstdCodec.decompress(&self.compressed, self.uncompressed_len)
    }
}

/// One re-read prescription: file offsets and lengths of DEPN lines that
/// were never copied into memory, to be refilled by seek+read when the
/// dispatcher later attaches this prescription to a VB.
#[derive(Debug, Clone, Default)]
pub struct Prescription {
    pub entries: Vec<(u64, u32)>,
}

impl Prescription {
    fn accounted_bytes(&self) -> usize {
        self.entries.iter().map(|&(_, len)| len as usize).sum()
    }
}

/// What the dispatcher got back from asking the router for a new VB's
/// worth of generated-component data.
pub enum GencompSource {
    Oob(QueueSlot),
    Depn(QueueSlot),
    DepnOffloaded(OffloadRecord),
    Reread(Prescription),
}

pub struct GencompRouter {
    target_vb_size: usize,
    oob_queue: SlotQueue,
    depn_queue: SlotQueue,
    oob_accum: ComponentAccum,
    depn_accum: ComponentAccum,
    num_main_vbs_absorbed: u32,
    finished_absorbing: bool,
    depn_offload: VecDeque<OffloadRecord>,
    prescriptions: VecDeque<Prescription>,
    current_prescription: Prescription,
    /// "Rotation happens at most once per MAIN VB" — reset every time
    /// `mark_main_vb_absorbed` is called.
    rotated_this_vb: bool,
    depn_reread_enabled: bool,
}

impl GencompRouter {
    pub fn new(target_vb_size: usize, queue_capacity: usize, depn_reread_enabled: bool) -> Self {
        GencompRouter {
            target_vb_size,
            oob_queue: SlotQueue::with_capacity(queue_capacity),
            depn_queue: SlotQueue::with_capacity(queue_capacity),
            oob_accum: ComponentAccum::default(),
            depn_accum: ComponentAccum::default(),
            num_main_vbs_absorbed: 0,
            finished_absorbing: false,
            depn_offload: VecDeque::new(),
            prescriptions: VecDeque::new(),
            current_prescription: Prescription::default(),
            rotated_this_vb: false,
            depn_reread_enabled,
        }
    }

    pub fn num_main_vbs_absorbed(&self) -> u32 {
        self.num_main_vbs_absorbed
    }

    pub fn mark_main_vb_absorbed(&mut self) {
        self.num_main_vbs_absorbed += 1;
        self.rotated_this_vb = false;
    }

    /// Absorb one gencomp-classified line. `force_reread` mirrors
    /// `--force-reread`: always divert DEPN lines to a prescription
    /// instead of the in-memory queue.
    pub fn absorb_line(&mut self, kind: GencompKind, comp_i: u32, line_offset: u64, line_bytes: &[u8], force_reread: bool) -> Result<()> {
        match kind {
            GencompKind::Oob => {
                self.oob_accum.comp_i = comp_i;
                if self.oob_accum.bytes.len() + line_bytes.len() > self.target_vb_size {
                    self.flush_oob();
                }
                self.oob_accum.bytes.extend_from_slice(line_bytes);
                self.oob_accum.num_lines += 1;
            }
            GencompKind::Depn => {
                self.depn_accum.comp_i = comp_i;
                if self.depn_accum.bytes.len() + line_bytes.len() > self.target_vb_size {
                    self.flush_depn()?;
                }
                let use_reread = self.depn_reread_enabled && (force_reread || self.depn_queue.is_full());
                if use_reread {
                    self.current_prescription.entries.push((line_offset, line_bytes.len() as u32));
                    if !self.rotated_this_vb && self.current_prescription.accounted_bytes() > self.target_vb_size {
                        self.rotate_prescription();
                        self.rotated_this_vb = true;
                    }
                } else {
                    self.depn_accum.bytes.extend_from_slice(line_bytes);
                    self.depn_accum.num_lines += 1;
                }
            }
        }
        Ok(())
    }

    fn rotate_prescription(&mut self) {
        let finished = std::mem::take(&mut self.current_prescription);
        self.prescriptions.push_back(finished);
    }

    /// Flush the OOB accumulator to its queue. Returns `false` if the
    /// queue is full — the caller must let its buffer grow and produce an
    /// oversized VB later; there is no correctness loss in declining.
    pub fn flush_oob(&mut self) -> bool {
        if self.oob_accum.num_lines == 0 {
            return true;
        }
        if self.oob_queue.is_full() {
            return false;
        }
        let slot = QueueSlot {
            bytes: std::mem::take(&mut self.oob_accum.bytes),
            num_lines: std::mem::take(&mut self.oob_accum.num_lines),
            comp_i: self.oob_accum.comp_i,
        };
        let pushed = self.oob_queue.try_push(slot);
        debug_assert!(pushed, "slot must be free right after checking is_full");
        true
    }

    /// Flush the DEPN accumulator to its queue, offloading the oldest
    /// queued batch first if the queue is full.
    pub fn flush_depn(&mut self) -> Result<()> {
        if self.depn_accum.num_lines == 0 {
            return Ok(());
        }
        if self.depn_queue.is_full() {
            let oldest = self.depn_queue.pop_oldest().expect("a full queue has an oldest entry");
            let compressed = ZstdCodec.compress(&oldest.bytes)?;
            self.depn_offload.push_back(OffloadRecord {
                compressed,
                uncompressed_len: oldest.bytes.len(),
                num_lines: oldest.num_lines,
                comp_i: oldest.comp_i,
            });
        }
        let slot = QueueSlot {
            bytes: std::mem::take(&mut self.depn_accum.bytes),
            num_lines: std::mem::take(&mut self.depn_accum.num_lines),
            comp_i: self.depn_accum.comp_i,
        };
        let pushed = self.depn_queue.try_push(slot);
        debug_assert!(pushed, "slot must be free right after offloading");
        Ok(())
    }

    /// Declare MAIN-VB ingestion complete, rotating any in-progress
    /// prescription so it becomes eligible for dispatch.
    pub fn finish_absorbing(&mut self) {
        self.finished_absorbing = true;
        if !self.current_prescription.entries.is_empty() {
            self.rotate_prescription();
        }
    }

    /// Dispatcher path: OOB before DEPN, in-memory DEPN before offloaded
    /// DEPN, re-read prescriptions last — and only once ingestion has
    /// finished for anything past OOB.
    pub fn next_vb_source(&mut self) -> Option<GencompSource> {
        if !self.oob_queue.is_empty() {
            return self.oob_queue.pop_oldest().map(GencompSource::Oob);
        }
        if !self.finished_absorbing {
            return None;
        }
        if !self.depn_queue.is_empty() {
            return self.depn_queue.pop_oldest().map(GencompSource::Depn);
        }
        if let Some(rec) = self.depn_offload.pop_front() {
            return Some(GencompSource::DepnOffloaded(rec));
        }
        if let Some(prescription) = self.prescriptions.pop_front() {
            return Some(GencompSource::Reread(prescription));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oob_declines_flush_when_queue_is_full() {
        let mut router = GencompRouter::new(1024, 1, false);
        router.absorb_line(GencompKind::Oob, 1, 0, b"line one\n", false).unwrap();
        assert!(router.flush_oob());
        router.absorb_line(GencompKind::Oob, 1, 9, b"line two\n", false).unwrap();
        assert!(!router.flush_oob(), "queue of capacity 1 must be full after one flush");
    }

    #[test]
    fn depn_offloads_oldest_batch_when_queue_full() {
        let mut router = GencompRouter::new(1024, 1, false);
        router.absorb_line(GencompKind::Depn, 2, 0, b"aaaa\n", false).unwrap();
        router.flush_depn().unwrap();
        router.absorb_line(GencompKind::Depn, 2, 5, b"bbbb\n", false).unwrap();
        router.flush_depn().unwrap();
        assert_eq!(router.depn_offload.len(), 1);
        let rec = &router.depn_offload[0];
        assert_eq!(rec.decompress().unwrap(), b"aaaa\n");
    }

    #[test]
    fn dispatcher_serves_oob_before_depn_before_offload_before_reread() {
        let mut router = GencompRouter::new(1024, 2, true);
        router.absorb_line(GencompKind::Depn, 0, 0, b"d1\n", false).unwrap();
        router.flush_depn().unwrap();
        router.absorb_line(GencompKind::Oob, 0, 3, b"o1\n", false).unwrap();
        router.flush_oob();
        router.finish_absorbing();

        match router.next_vb_source() {
            Some(GencompSource::Oob(slot)) => assert_eq!(slot.bytes, b"o1\n"),
            other => panic!("expected OOB first, got {other:?}", other = debug_kind(&other)),
        }
        match router.next_vb_source() {
            Some(GencompSource::Depn(slot)) => assert_eq!(slot.bytes, b"d1\n"),
            other => panic!("expected DEPN second, got {other:?}", other = debug_kind(&other)),
        }
        assert!(router.next_vb_source().is_none());
    }

    #[test]
    fn rotation_happens_at_most_once_per_main_vb() {
        let mut router = GencompRouter::new(8, 1, true);
        router.absorb_line(GencompKind::Depn, 0, 0, b"00000000", false).unwrap(); // fills queue via flush trigger below
        router.flush_depn().unwrap();
        // Force re-read by making the queue full, then push enough bytes
        // across two lines to exceed target_vb_size twice within one VB.
        router.absorb_line(GencompKind::Depn, 0, 8, b"aaaaaaaaaa", true).unwrap();
        router.absorb_line(GencompKind::Depn, 0, 18, b"bbbbbbbbbb", true).unwrap();
        assert_eq!(router.prescriptions.len(), 1, "only one rotation despite two oversized pushes in one VB");
    }

    fn debug_kind(source: &Option<GencompSource>) -> &'static str {
        match source {
            Some(GencompSource::Oob(_)) => "Oob",
            Some(GencompSource::Depn(_)) => "Depn",
            Some(GencompSource::DepnOffloaded(_)) => "DepnOffloaded",
            Some(GencompSource::Reread(_)) => "Reread",
            None => "None",
        }
    }
}
