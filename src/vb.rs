//! The variant block: the unit of parallelism for both segmentation and
//! reconstruction.
//!
//! A VB owns one of two disjoint states depending on direction — the
//! growing `Seg` side builds up contexts from raw input text, the `Piz`
//! side walks already-populated contexts to rebuild text — mirroring how
//! this crate's archive type used to pair a single struct with either a
//! reader or a writer underneath, never both.

use crate::context::ContextTable;

/// Which generated component a VB belongs to. `Main` is the primary
/// input stream; `Oob`/`Depn` VBs are produced by the router described in
/// `gencomp.rs` and carry lines diverted out of MAIN VBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    Main,
    Oob,
    Depn,
}

/// Byte range of one line within a VB's `txt_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub start: u32,
    pub len: u32,
}

enum VbState {
    /// Building contexts from input text; `txt_data` is the raw source.
    Seg,
    /// Walking contexts to rebuild text; `recon_buffer` is the growing
    /// output and starts empty.
    Piz { recon_buffer: Vec<u8> },
}

pub struct VariantBlock {
    pub vblock_i: u32,
    pub comp_i: u32,
    pub comp_kind: CompKind,
    pub contexts: ContextTable,
    pub line_index: Vec<LineSpan>,
    pub txt_data: Vec<u8>,
    state: VbState,
}

impl VariantBlock {
    /// A fresh VB about to be segmented from `txt_data`.
    pub fn new_for_seg(vblock_i: u32, comp_i: u32, comp_kind: CompKind, txt_data: Vec<u8>) -> Self {
        VariantBlock {
            vblock_i,
            comp_i,
            comp_kind,
            contexts: ContextTable::new(),
            line_index: Vec::new(),
            txt_data,
            state: VbState::Seg,
        }
    }

    /// A VB about to be reconstructed: `contexts` has already been
    /// decompressed and loaded from its on-disk sections.
    pub fn new_for_piz(vblock_i: u32, comp_i: u32, comp_kind: CompKind, contexts: ContextTable) -> Self {
        VariantBlock {
            vblock_i,
            comp_i,
            comp_kind,
            contexts,
            line_index: Vec::new(),
            txt_data: Vec::new(),
            state: VbState::Piz { recon_buffer: Vec::new() },
        }
    }

    pub fn is_seg(&self) -> bool {
        matches!(self.state, VbState::Seg)
    }

    pub fn record_line(&mut self, start: u32, len: u32) {
        self.line_index.push(LineSpan { start, len });
    }

    pub fn num_lines(&self) -> usize {
        self.line_index.len()
    }

    /// The growing reconstruction buffer. Panics if called on a VB that's
    /// being segmented rather than reconstructed — those are programmer
    /// errors, never a runtime condition a caller needs to recover from.
    pub fn recon_buffer(&self) -> &[u8] {
        match &self.state {
            VbState::Piz { recon_buffer } => recon_buffer,
            VbState::Seg => panic!("recon_buffer called on a VB being segmented"),
        }
    }

    pub fn recon_buffer_mut(&mut self) -> &mut Vec<u8> {
        match &mut self.state {
            VbState::Piz { recon_buffer } => recon_buffer,
            VbState::Seg => panic!("recon_buffer_mut called on a VB being segmented"),
        }
    }

    /// Disjoint mutable access to `contexts` and the reconstruction buffer
    /// at once — needed by the reconstruction driver, which must thread
    /// both through `container_reconstruct` in the same call.
    pub fn contexts_and_recon_buffer_mut(&mut self) -> (&mut ContextTable, &mut Vec<u8>) {
        match &mut self.state {
            VbState::Piz { recon_buffer } => (&mut self.contexts, recon_buffer),
            VbState::Seg => panic!("contexts_and_recon_buffer_mut called on a VB being segmented"),
        }
    }

    /// Check the reconstructed byte count against the declared length
    /// recorded at segmentation time, per the VB-completion invariant.
    pub fn verify_recon_size(&self, declared_len: usize) -> Result<(), (usize, usize)> {
        let actual = self.recon_buffer().len();
        if actual == declared_len {
            Ok(())
        } else {
            Err((actual, declared_len))
        }
    }
}
