//! Reconstruction driver: walks a VB's declared line count against its
//! top-level container, applies drop-line filters, and verifies the
//! finished buffer's length against what segmentation declared.
//!
//! Grounded on the same "one struct, one orchestration entry point" shape
//! this crate's archive reader used for `extract_all`, generalized from
//! "iterate file entries" to "iterate a VB's records through a container".

use crate::container::{container_reconstruct, Container, ContainerHooks};
use crate::context::ContextTable;
use crate::deferred::DeferredQueue;
use crate::error::{EngineError, ErrorSite, Result};
use crate::vb::VariantBlock;

/// Per-line keep/drop decision, evaluated after a record has been
/// reconstructed into the buffer but before its bytes are committed to
/// the VB's line index. Formats implement this for `--regions`,
/// `--samples`, `--snps-only`, `--indels-only` and similar filters;
/// `KeepAll` is the default with none active.
pub trait LineFilter {
    fn keep(&mut self, line_i: u32, line_bytes: &[u8]) -> bool;
}

pub struct KeepAll;

impl LineFilter for KeepAll {
    fn keep(&mut self, _line_i: u32, _line_bytes: &[u8]) -> bool {
        true
    }
}

/// What a VB needs reconstructed: the top-level container driving one
/// record, and how many times to drive it.
pub struct ReconstructPlan<'a> {
    pub toplevel: &'a Container,
    pub declared_lines: u32,
}

/// Adapts a [`LineFilter`] to the container engine's [`ContainerHooks`],
/// so a record's keep/drop decision is made — and its bytes truncated out
/// on rejection — by `container_reconstruct` itself rather than by a
/// second pass over the finished buffer.
struct LineFilterHooks<'a> {
    filter: &'a mut dyn LineFilter,
    line_i: u32,
    kept_count: u32,
}

impl<'a> ContainerHooks for LineFilterHooks<'a> {
    fn keep_record(&mut self, _table: &ContextTable, _repeat: u32, bytes: &[u8]) -> bool {
        let keep = self.filter.keep(self.line_i, bytes);
        self.line_i += 1;
        if keep {
            self.kept_count += 1;
        }
        keep
    }
}

/// Reconstruct every line of `vb` per `plan`, running `filter` after each
/// record and before committing it to the line index. Lines the filter
/// rejects are truncated back out of the buffer by the container engine
/// itself — their contexts' b250 cursors have already advanced, which is
/// intentional: a dropped line still consumes its place in every
/// context's stream.
pub fn reconstruct_vb(
    vb: &mut VariantBlock,
    plan: &ReconstructPlan<'_>,
    filter: &mut dyn LineFilter,
    deferred: &DeferredQueue,
) -> Result<()> {
    let mut hooks = LineFilterHooks {
        filter,
        line_i: 0,
        kept_count: 0,
    };

    for _ in 0..plan.declared_lines {
        let (contexts, out) = vb.contexts_and_recon_buffer_mut();
        let line_start = out.len();
        let kept_before = hooks.kept_count;
        container_reconstruct(contexts, plan.toplevel, out, &mut hooks)?;
        let line_end = out.len();

        if hooks.kept_count > kept_before {
            vb.record_line(line_start as u32, (line_end - line_start) as u32);
        }
    }

    if !deferred.all_filled() {
        return Err(EngineError::resource(
            ErrorSite::new().vb(vb.vblock_i),
            "deferred insertion queue has unfilled placeholders at VB completion",
        ));
    }
    Ok(())
}

/// Compare the finished buffer's length against the length segmentation
/// declared for this VB, producing the extraction-hint diagnostic the
/// error contract requires on mismatch.
pub fn verify_and_finish(vb: &VariantBlock, declared_recon_len: usize, input_file: &str) -> Result<()> {
    vb.verify_recon_size(declared_recon_len).map_err(|(actual, declared)| {
        EngineError::format(
            ErrorSite::new().vb(vb.vblock_i),
            format!("reconstructed {actual} bytes, expected {declared}"),
            extraction_hint(input_file, vb.vblock_i),
        )
    })
}

fn extraction_hint(input_file: &str, vblock_i: u32) -> String {
    format!("re-run with --extract-vb {vblock_i} {input_file} to reproduce this block in isolation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerItem;
    use crate::dict_id::{DictId, DictIdType};
    use crate::vb::CompKind;

    fn toplevel_two_fields() -> (Container, DictId, DictId) {
        let chrom_id = DictId::new(b"CHROM", DictIdType::Field);
        let pos_id = DictId::new(b"POS", DictIdType::Field);
        let mut container = Container::new(vec![
            ContainerItem::new(chrom_id).with_separator(crate::container::ItemSep::single(b'\t')),
            ContainerItem::new(pos_id),
        ])
        .with_repeats(1);
        container.is_toplevel = true;
        (container, chrom_id, pos_id)
    }

    #[test]
    fn reconstructs_declared_line_count_and_records_line_index() {
        let (container, chrom_id, pos_id) = toplevel_two_fields();
        let mut vb = VariantBlock::new_for_piz(1, 0, CompKind::Main, crate::context::ContextTable::new());
        vb.contexts.add_context("CHROM", chrom_id);
        vb.contexts.add_context("POS", pos_id);
        let chrom = vb.contexts.find(chrom_id).unwrap();
        let pos = vb.contexts.find(pos_id).unwrap();
        vb.contexts.get_mut(chrom).append_snip(b"chr1");
        vb.contexts.get_mut(pos).append_snip(b"100");

        let plan = ReconstructPlan {
            toplevel: &container,
            declared_lines: 1,
        };
        let deferred = DeferredQueue::new();
        reconstruct_vb(&mut vb, &plan, &mut KeepAll, &deferred).unwrap();

        assert_eq!(vb.recon_buffer(), b"chr1\t100");
        assert_eq!(vb.num_lines(), 1);
        assert!(verify_and_finish(&vb, 8, "sample.vcf").is_ok());
    }

    #[test]
    fn dropped_line_is_not_recorded_but_still_consumes_its_b250_entries() {
        let (container, chrom_id, pos_id) = toplevel_two_fields();
        let mut vb = VariantBlock::new_for_piz(1, 0, CompKind::Main, crate::context::ContextTable::new());
        vb.contexts.add_context("CHROM", chrom_id);
        vb.contexts.add_context("POS", pos_id);
        let chrom = vb.contexts.find(chrom_id).unwrap();
        let pos = vb.contexts.find(pos_id).unwrap();
        vb.contexts.get_mut(chrom).append_snip(b"chr1");
        vb.contexts.get_mut(pos).append_snip(b"100");
        vb.contexts.get_mut(chrom).append_snip(b"chr2");
        vb.contexts.get_mut(pos).append_snip(b"200");

        struct DropFirst;
        impl LineFilter for DropFirst {
            fn keep(&mut self, line_i: u32, _line_bytes: &[u8]) -> bool {
                line_i != 0
            }
        }

        let plan = ReconstructPlan {
            toplevel: &container,
            declared_lines: 2,
        };
        let deferred = DeferredQueue::new();
        reconstruct_vb(&mut vb, &plan, &mut DropFirst, &deferred).unwrap();

        assert_eq!(vb.recon_buffer(), b"chr2\t200");
        assert_eq!(vb.num_lines(), 1);
    }

    #[test]
    fn unfilled_deferred_queue_fails_vb_completion() {
        let (container, chrom_id, pos_id) = toplevel_two_fields();
        let mut vb = VariantBlock::new_for_piz(1, 0, CompKind::Main, crate::context::ContextTable::new());
        vb.contexts.add_context("CHROM", chrom_id);
        vb.contexts.add_context("POS", pos_id);
        let chrom = vb.contexts.find(chrom_id).unwrap();
        let pos = vb.contexts.find(pos_id).unwrap();
        vb.contexts.get_mut(chrom).append_snip(b"chr1");
        vb.contexts.get_mut(pos).append_snip(b"100");

        let plan = ReconstructPlan {
            toplevel: &container,
            declared_lines: 1,
        };
        let mut out = Vec::new();
        let mut deferred = DeferredQueue::new();
        let _ = deferred.reserve(&mut out, chrom, 4, b' ');

        let err = reconstruct_vb(&mut vb, &plan, &mut KeepAll, &deferred).unwrap_err();
        assert!(matches!(err, EngineError::Resource { .. }));
    }

    #[test]
    fn size_mismatch_produces_an_extraction_hint() {
        let (container, chrom_id, pos_id) = toplevel_two_fields();
        let mut vb = VariantBlock::new_for_piz(1, 0, CompKind::Main, crate::context::ContextTable::new());
        vb.contexts.add_context("CHROM", chrom_id);
        vb.contexts.add_context("POS", pos_id);
        let chrom = vb.contexts.find(chrom_id).unwrap();
        let pos = vb.contexts.find(pos_id).unwrap();
        vb.contexts.get_mut(chrom).append_snip(b"chr1");
        vb.contexts.get_mut(pos).append_snip(b"100");

        let plan = ReconstructPlan {
            toplevel: &container,
            declared_lines: 1,
        };
        let deferred = DeferredQueue::new();
        reconstruct_vb(&mut vb, &plan, &mut KeepAll, &deferred).unwrap();

        let err = verify_and_finish(&vb, 999, "sample.vcf").unwrap_err();
        let line = err.diagnostic_line("sample.vcf");
        assert!(line.contains("--extract-vb"));
    }
}
