//! Peek/restore scopes over context reconstruction cursors.
//!
//! Several opcodes (`REDIRECTION`, the generated-component re-read path)
//! need to look at what a context's *next* value would be without
//! actually consuming it if the caller decides not to use it. A
//! [`PeekStack`] models this as nested scopes: `begin` opens a scope,
//! `touch` records a context's cursor the first time it's read within
//! that scope, and the scope ends with either `restore` (rewind every
//! touched context) or `commit` (keep the advances).

use crate::context::{ContextTable, CursorSnapshot};

struct PeekPoint {
    saved: Vec<(usize, CursorSnapshot)>,
}

/// A stack of nested peek scopes. Scopes must be closed in LIFO order —
/// `restore`/`commit` always act on the innermost open scope.
#[derive(Default)]
pub struct PeekStack {
    stack: Vec<PeekPoint>,
}

impl PeekStack {
    pub fn new() -> Self {
        PeekStack::default()
    }

    pub fn begin(&mut self) {
        self.stack.push(PeekPoint { saved: Vec::new() });
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Record `ctx_idx`'s current cursor state, if this is the first time
    /// it's been touched since the innermost `begin`. Call this *before*
    /// reading from the context.
    pub fn touch(&mut self, table: &ContextTable, ctx_idx: usize) {
        if let Some(point) = self.stack.last_mut() {
            if !point.saved.iter().any(|(i, _)| *i == ctx_idx) {
                point.saved.push((ctx_idx, table.cursor_snapshot(ctx_idx)));
            }
        }
    }

    /// Rewind every context touched since the matching `begin`, discarding
    /// whatever reads happened inside the scope.
    pub fn restore(&mut self, table: &mut ContextTable) {
        if let Some(point) = self.stack.pop() {
            for (ctx_idx, snap) in point.saved {
                table.restore_cursor(ctx_idx, snap);
            }
        }
    }

    /// Close the innermost scope, keeping every advance made inside it.
    pub fn commit(&mut self) {
        self.stack.pop();
    }
}
