//! Compute-thread pool and the dispatcher's writer-mutex discipline.
//!
//! One VB per compute task, draining a dispatcher queue; the dispatcher
//! itself (in practice the main thread) is the only party that mutates
//! the section list and the write cursor, serialized behind a single
//! [`Writer`] mutex — the same "many workers, one mutex-guarded sink"
//! shape this crate's streaming writer used to finalize blocks, widened
//! here to also guard the generated-component router.
//!
//! `run_compute_pool` mirrors the Rayon-with-sequential-fallback dual
//! path this crate already used for parallel chunk compression: Rayon
//! behind the `parallel` feature, a plain sequential loop otherwise, same
//! call shape either way.

use std::sync::Mutex;

use crate::error::Result;
use crate::gencomp::{GencompRouter, GencompSource};
use crate::section::{SectionEnt, SectionList};

/// Run each job to completion, in parallel when the `parallel` feature is
/// enabled, sequentially otherwise. Order of the returned results matches
/// the order of `jobs`. A failing job's error is preserved at its index
/// rather than short-circuiting the rest — every other VB's compute work
/// is independent and should still finish.
pub fn run_compute_pool<F, T>(jobs: Vec<F>) -> Vec<Result<T>>
where
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        jobs.into_par_iter().map(|job| job()).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        jobs.into_iter().map(|job| job()).collect()
    }
}

struct WriterState {
    section_list: SectionList,
    next_offset: u64,
}

/// The single writer-mutex-protected sink: every compute thread that
/// finishes framing a section calls [`Writer::append_section`], which
/// assigns that section its absolute file offset and records it in the
/// shared section list. No other path may touch either.
pub struct Writer {
    state: Mutex<WriterState>,
}

impl Writer {
    pub fn new(starting_offset: u64) -> Self {
        Writer {
            state: Mutex::new(WriterState {
                section_list: SectionList::new(),
                next_offset: starting_offset,
            }),
        }
    }

    /// Append one already-framed section (header + payload concatenated).
    /// `build_entry` receives the assigned absolute offset and produces
    /// the [`SectionEnt`] to record — keeping offset assignment and entry
    /// construction atomic under the lock.
    pub fn append_section(&self, framed_len: u64, build_entry: impl FnOnce(u64) -> SectionEnt) -> u64 {
        let mut state = self.state.lock().expect("writer mutex poisoned");
        let offset = state.next_offset;
        let entry = build_entry(offset);
        state.section_list.push(entry);
        state.next_offset += framed_len;
        offset
    }

    pub fn current_offset(&self) -> u64 {
        self.state.lock().expect("writer mutex poisoned").next_offset
    }

    pub fn into_section_list(self) -> SectionList {
        self.state.into_inner().expect("writer mutex poisoned").section_list
    }
}

/// The dispatcher: owns the generated-component router behind its own
/// mutex (separate from the writer, since absorbing a line never needs
/// to touch the section list) and hands compute threads their next unit
/// of work.
pub struct Dispatcher {
    router: Mutex<GencompRouter>,
    pub writer: Writer,
}

impl Dispatcher {
    pub fn new(router: GencompRouter, writer: Writer) -> Self {
        Dispatcher {
            router: Mutex::new(router),
            writer,
        }
    }

    pub fn next_gencomp_source(&self) -> Option<GencompSource> {
        self.router.lock().expect("router mutex poisoned").next_vb_source()
    }

    pub fn mark_main_vb_absorbed(&self) {
        self.router.lock().expect("router mutex poisoned").mark_main_vb_absorbed();
    }

    pub fn finish_absorbing(&self) {
        self.router.lock().expect("router mutex poisoned").finish_absorbing();
    }

    pub fn with_router<R>(&self, f: impl FnOnce(&mut GencompRouter) -> R) -> R {
        f(&mut self.router.lock().expect("router mutex poisoned"))
    }
}
