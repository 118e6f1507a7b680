//! The container engine: recursive repeat × item reconstruction.
//!
//! A container is itself just another snip — its wire form is the
//! `CONTAINER` opcode followed by a serialized descriptor — but unlike the
//! other opcodes its reconstruction isn't a single value: it replays each
//! item's own context `nitems_lo` times, optionally separated, optionally
//! prefixed, and threads MISSING/EMPTY items through without disturbing
//! the separator placement a present item would have produced.

use crate::context::ContextTable;
use crate::dict_id::DictId;
use crate::error::{EngineError, ErrorSite, Result};
use crate::snip::{reconstruct_one_snip, ReconstructOutcome, Snip, SnipOp};

/// Up to two raw separator bytes; `None` in either slot means "no
/// separator there" (distinguished from an explicit NUL separator, which
/// none of the supported text formats ever use).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemSep(pub Option<u8>, pub Option<u8>);

impl ItemSep {
    pub const NONE: ItemSep = ItemSep(None, None);

    pub fn single(b: u8) -> Self {
        ItemSep(Some(b), None)
    }

    fn byte_len(self) -> usize {
        self.0.is_some() as usize + self.1.is_some() as usize
    }

    fn write(self, out: &mut Vec<u8>) {
        if let Some(b) = self.0 {
            out.push(b);
        }
        if let Some(b) = self.1 {
            out.push(b);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerItem {
    pub dict_id: DictId,
    pub separator: ItemSep,
    /// Literal bytes emitted before this item, every repeat (e.g. `"GT:"`
    /// in a FORMAT container whose first item is the genotype field).
    pub prefix: Vec<u8>,
}

impl ContainerItem {
    pub fn new(dict_id: DictId) -> Self {
        ContainerItem {
            dict_id,
            separator: ItemSep::NONE,
            prefix: Vec::new(),
        }
    }

    pub fn with_separator(mut self, sep: ItemSep) -> Self {
        self.separator = sep;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// A parsed `CONTAINER` snip: `nitems_lo` repeats of `items`, joined by
/// `repeat_sep` between repeats.
#[derive(Debug, Clone, Default)]
pub struct Container {
    pub repeats: u32,
    pub items: Vec<ContainerItem>,
    pub repeat_sep: ItemSep,
    /// Suppress the last item's separator on the container's final item
    /// of its final repeat (e.g. no trailing `:` after the last FORMAT
    /// subfield).
    pub drop_final_item_sep: bool,
    /// Suppress `repeat_sep` after the container's last repeat (e.g. no
    /// trailing `\t` after the last sample column).
    pub drop_final_repeat_sep: bool,
    /// `true` for the record-level container that drives a whole line's
    /// reconstruction (as opposed to a nested container, e.g. FORMAT's
    /// per-sample repeat nested inside the line container). Gates whether
    /// `container_reconstruct` invokes [`ContainerHooks::keep_record`]
    /// once per repeat.
    pub is_toplevel: bool,
    /// Gates whether `container_reconstruct` invokes
    /// [`ContainerHooks::keep_item`] before reconstructing each item —
    /// most containers have no per-item filter and pay nothing for the
    /// check.
    pub filter_items: bool,
}

impl Container {
    pub fn new(items: Vec<ContainerItem>) -> Self {
        Container {
            repeats: 1,
            items,
            repeat_sep: ItemSep::NONE,
            drop_final_item_sep: false,
            drop_final_repeat_sep: false,
            is_toplevel: false,
            filter_items: false,
        }
    }

    pub fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    pub fn with_repeat_sep(mut self, sep: ItemSep) -> Self {
        self.repeat_sep = sep;
        self
    }

    /// Serialize to the wire form embedded after the `CONTAINER` opcode
    /// byte in a dictionary entry.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![SnipOp::Container as u8];
        out.extend_from_slice(&self.repeats.to_le_bytes());
        out.push(self.items.len() as u8);
        for item in &self.items {
            out.extend_from_slice(&item.dict_id.as_u64().to_le_bytes());
            out.push(item.separator.0.unwrap_or(0));
            out.push(item.separator.1.unwrap_or(0));
        }
        out.push(self.repeat_sep.0.unwrap_or(0));
        out.push(self.repeat_sep.1.unwrap_or(0));
        let mut flags = 0u8;
        if self.drop_final_item_sep {
            flags |= 0b01;
        }
        if self.drop_final_repeat_sep {
            flags |= 0b10;
        }
        if self.is_toplevel {
            flags |= 0b100;
        }
        if self.filter_items {
            flags |= 0b1000;
        }
        out.push(flags);
        for item in &self.items {
            out.extend_from_slice(&item.prefix);
            out.push(0);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let truncated = || EngineError::context_invariant(ErrorSite::new(), "truncated CONTAINER descriptor", "CONTAINER", None);
        let body = if bytes.first() == Some(&(SnipOp::Container as u8)) { &bytes[1..] } else { bytes };

        let mut pos = 0usize;
        let take = |pos: &mut usize, n: usize| -> Result<std::ops::Range<usize>> {
            if *pos + n > body.len() {
                return Err(truncated());
            }
            let r = *pos..*pos + n;
            *pos += n;
            Ok(r)
        };

        let r = take(&mut pos, 4)?;
        let repeats = u32::from_le_bytes(body[r].try_into().unwrap());
        let r = take(&mut pos, 1)?;
        let num_items = body[r][0] as usize;

        let mut items = Vec::with_capacity(num_items);
        for _ in 0..num_items {
            let r = take(&mut pos, 8)?;
            let dict_id = DictId::from_u64(u64::from_le_bytes(body[r].try_into().unwrap()));
            let r = take(&mut pos, 2)?;
            let sep0 = body[r.clone()][0];
            let sep1 = body[r][1];
            items.push(ContainerItem {
                dict_id,
                separator: ItemSep(none_if_zero(sep0), none_if_zero(sep1)),
                prefix: Vec::new(),
            });
        }

        let r = take(&mut pos, 2)?;
        let repeat_sep = ItemSep(none_if_zero(body[r.clone()][0]), none_if_zero(body[r][1]));
        let r = take(&mut pos, 1)?;
        let flags = body[r][0];

        for item in items.iter_mut() {
            let end = body[pos..].iter().position(|&b| b == 0).map(|i| pos + i).ok_or_else(truncated)?;
            item.prefix = body[pos..end].to_vec();
            pos = end + 1;
        }

        Ok(Container {
            repeats,
            items,
            repeat_sep,
            drop_final_item_sep: flags & 0b01 != 0,
            drop_final_repeat_sep: flags & 0b10 != 0,
            is_toplevel: flags & 0b100 != 0,
            filter_items: flags & 0b1000 != 0,
        })
    }
}

fn none_if_zero(b: u8) -> Option<u8> {
    if b == 0 {
        None
    } else {
        Some(b)
    }
}

/// Hooks a container-reconstructing caller plugs in to filter records and
/// items, and to react to each item once it's been reconstructed — the
/// seam running-sum fields, lookback inserts, and format-to-VCF
/// translation hooks all graft onto. [`NoHooks`] is the zero-cost default
/// for callers with nothing to hook.
pub trait ContainerHooks {
    /// Invoked once per repeat of a container whose `is_toplevel` flag is
    /// set, after that repeat's items have all been reconstructed, with
    /// the bytes written for it so far. Returning `false` drops the
    /// record: its bytes are retracted from `out`. Every context touched
    /// while producing it has already advanced its b250 cursor — a
    /// dropped record still consumes its place in every context's stream.
    fn keep_record(&mut self, table: &ContextTable, repeat: u32, bytes: &[u8]) -> bool {
        let _ = (table, repeat, bytes);
        true
    }

    /// Invoked per item before it is reconstructed, when the container's
    /// `filter_items` flag is set. Returning `false` skips the item
    /// entirely: no b250 entry is consumed and no separator is emitted,
    /// as if the item were never in the container.
    fn keep_item(&mut self, table: &ContextTable, dict_id: DictId, repeat: u32, item_idx: usize) -> bool {
        let _ = (table, dict_id, repeat, item_idx);
        true
    }

    /// Invoked after a present (non-MISSING, non-skipped) item has been
    /// reconstructed into `out`.
    fn after_item(&mut self, table: &mut ContextTable, dict_id: DictId, repeat: u32, item_idx: usize, out: &mut Vec<u8>) {
        let _ = (table, dict_id, repeat, item_idx, out);
    }
}

/// No-op [`ContainerHooks`] for callers with no filtering or per-item
/// reaction to perform.
pub struct NoHooks;
impl ContainerHooks for NoHooks {}

/// Walk `container`'s repeats × items, reconstructing each item's next
/// pending value from its own context and emitting separators per the
/// protocol above. `table` owns every context; `out` is the VB's growing
/// reconstruction buffer; `hooks` filters records/items and reacts to
/// each reconstructed item per `container.is_toplevel`/`filter_items`.
pub fn container_reconstruct(table: &mut ContextTable, container: &Container, out: &mut Vec<u8>, hooks: &mut dyn ContainerHooks) -> Result<()> {
    for repeat in 0..container.repeats {
        let record_start = out.len();
        // Bytes written for the *previous* item's separator in this
        // repeat; retracted wholesale if the next item turns out MISSING,
        // since a MISSING item must not leave a dangling separator before
        // it.
        let mut pending_sep_len = 0usize;

        for (item_idx, item) in container.items.iter().enumerate() {
            let ctx_idx = table.find(item.dict_id).ok_or_else(|| {
                EngineError::context_invariant(
                    ErrorSite::new(),
                    "container item references an unknown dict_id",
                    "CONTAINER",
                    Some(item.dict_id.to_string()),
                )
            })?;

            if container.filter_items && !hooks.keep_item(table, item.dict_id, repeat, item_idx) {
                continue;
            }

            let prefix_start = out.len();
            out.extend_from_slice(&item.prefix);
            let item_start = out.len();

            let outcome = reconstruct_next(table, ctx_idx, out, hooks)?;

            if outcome == ReconstructOutcome::Missing {
                let retract_to = prefix_start.saturating_sub(pending_sep_len);
                out.truncate(retract_to);
                pending_sep_len = 0;
                continue;
            }
            let _ = item_start;
            hooks.after_item(table, item.dict_id, repeat, item_idx, out);

            let is_last_item = item_idx + 1 == container.items.len();
            if is_last_item && container.drop_final_item_sep {
                pending_sep_len = 0;
                continue;
            }
            item.separator.write(out);
            pending_sep_len = item.separator.byte_len();
        }

        if container.is_toplevel && !hooks.keep_record(table, repeat, &out[record_start..]) {
            out.truncate(record_start);
            continue;
        }

        let is_last_repeat = repeat + 1 == container.repeats;
        if is_last_repeat && container.drop_final_repeat_sep {
            continue;
        }
        container.repeat_sep.write(out);
    }
    Ok(())
}

/// Pull the next pending b250 entry for `ctx_idx` and reconstruct it,
/// dispatching to a nested container when the resolved snip is itself a
/// `CONTAINER`.
fn reconstruct_next(table: &mut ContextTable, ctx_idx: usize, out: &mut Vec<u8>, hooks: &mut dyn ContainerHooks) -> Result<ReconstructOutcome> {
    let bytes = table.next_b250_snip(ctx_idx)?;
    if bytes.is_empty() {
        return Ok(ReconstructOutcome::Empty);
    }
    if bytes.first() == Some(&(SnipOp::Container as u8)) {
        let nested = Container::decode(&bytes)?;
        container_reconstruct(table, &nested, out, hooks)?;
        return Ok(ReconstructOutcome::Wrote);
    }
    let outcome = reconstruct_one_snip(table, ctx_idx, Snip::new(&bytes), out)?;
    if outcome == ReconstructOutcome::Wrote {
        record_lookback(table, ctx_idx, out);
    }
    Ok(outcome)
}

/// Feed a just-reconstructed item's text and numeric value into its own
/// lookback ring, if `ctx_idx` is marked as lookback-tracked. A no-op for
/// the common case where no `LOOKBACK` snip anywhere addresses this
/// context.
fn record_lookback(table: &mut ContextTable, ctx_idx: usize, out: &[u8]) {
    let ctx = table.get(ctx_idx);
    let capacity = match ctx.flags.lookback_capacity {
        Some(capacity) => capacity,
        None => return,
    };
    let (start, len) = match ctx.last_txt {
        Some(range) => range,
        None => return,
    };
    let value = ctx.last_value.as_int().unwrap_or(0);
    let bytes = out[start..start + len].to_vec();
    table.get_mut(ctx_idx).ensure_lookback(capacity).insert(&bytes, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict_id::DictIdType;

    fn setup_pair() -> (ContextTable, DictId, DictId) {
        let mut table = ContextTable::new();
        let chrom_id = DictId::new(b"CHROM", DictIdType::Field);
        let pos_id = DictId::new(b"POS", DictIdType::Field);
        table.add_context("CHROM", chrom_id);
        table.add_context("POS", pos_id);
        (table, chrom_id, pos_id)
    }

    #[test]
    fn two_item_container_joins_with_separator() {
        let (mut table, chrom_id, pos_id) = setup_pair();
        let chrom = table.find(chrom_id).unwrap();
        let pos = table.find(pos_id).unwrap();
        table.get_mut(chrom).append_snip(b"chr1");
        table.get_mut(pos).append_snip(b"100");

        let container = Container::new(vec![
            ContainerItem::new(chrom_id).with_separator(ItemSep::single(b'\t')),
            ContainerItem::new(pos_id),
        ]);

        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut NoHooks).unwrap();
        assert_eq!(out, b"chr1\t100");
    }

    #[test]
    fn missing_item_elides_its_preceding_separator() {
        let mut table = ContextTable::new();
        let a_id = DictId::new(b"A", DictIdType::Field);
        let b_id = DictId::new(b"B", DictIdType::Field);
        let c_id = DictId::new(b"C", DictIdType::Field);
        table.add_context("A", a_id);
        table.add_context("B", b_id);
        table.add_context("C", c_id);
        let a = table.find(a_id).unwrap();
        let b = table.find(b_id).unwrap();
        let c = table.find(c_id).unwrap();
        table.get_mut(a).append_snip(b"aa");
        table.get_mut(b).append_missing();
        table.get_mut(c).append_snip(b"cc");

        let container = Container::new(vec![
            ContainerItem::new(a_id).with_separator(ItemSep::single(b':')),
            ContainerItem::new(b_id).with_separator(ItemSep::single(b':')),
            ContainerItem::new(c_id),
        ]);

        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut NoHooks).unwrap();
        assert_eq!(out, b"aa:cc");
    }

    #[test]
    fn drop_final_item_sep_suppresses_trailing_separator() {
        let (mut table, chrom_id, pos_id) = setup_pair();
        let chrom = table.find(chrom_id).unwrap();
        let pos = table.find(pos_id).unwrap();
        table.get_mut(chrom).append_snip(b"chr1");
        table.get_mut(pos).append_snip(b"100");

        let mut container = Container::new(vec![
            ContainerItem::new(chrom_id).with_separator(ItemSep::single(b'\t')),
            ContainerItem::new(pos_id).with_separator(ItemSep::single(b'\t')),
        ]);
        container.drop_final_item_sep = true;

        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut NoHooks).unwrap();
        assert_eq!(out, b"chr1\t100");
    }

    #[test]
    fn is_toplevel_record_filter_drops_a_repeat_and_keeps_b250_consumed() {
        let mut table = ContextTable::new();
        let a_id = DictId::new(b"A", DictIdType::Field);
        table.add_context("A", a_id);
        let a = table.find(a_id).unwrap();
        table.get_mut(a).append_snip(b"one");
        table.get_mut(a).append_snip(b"two");

        let mut container = Container::new(vec![ContainerItem::new(a_id)]);
        container.repeats = 2;
        container.is_toplevel = true;

        struct DropFirst(u32);
        impl ContainerHooks for DropFirst {
            fn keep_record(&mut self, _table: &ContextTable, repeat: u32, _bytes: &[u8]) -> bool {
                self.0 += 1;
                repeat != 0
            }
        }
        let mut hooks = DropFirst(0);
        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut hooks).unwrap();
        assert_eq!(out, b"two");
        assert_eq!(hooks.0, 2, "keep_record runs once per repeat even when dropped");
    }

    #[test]
    fn filter_items_skips_an_item_without_consuming_its_b250_entry() {
        let (mut table, chrom_id, pos_id) = setup_pair();
        let chrom = table.find(chrom_id).unwrap();
        let pos = table.find(pos_id).unwrap();
        table.get_mut(chrom).append_snip(b"chr1");
        table.get_mut(pos).append_snip(b"100");
        table.get_mut(pos).append_snip(b"200");

        let mut container = Container::new(vec![
            ContainerItem::new(chrom_id).with_separator(ItemSep::single(b'\t')),
            ContainerItem::new(pos_id),
        ]);
        container.filter_items = true;

        struct SkipChrom(DictId);
        impl ContainerHooks for SkipChrom {
            fn keep_item(&mut self, _table: &ContextTable, dict_id: DictId, _repeat: u32, _item_idx: usize) -> bool {
                dict_id != self.0
            }
        }
        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut SkipChrom(chrom_id)).unwrap();
        assert_eq!(out, b"100");

        // CHROM's b250 cursor never advanced; its single entry is still
        // there for the next record to consume.
        out.clear();
        container_reconstruct(&mut table, &container, &mut out, &mut SkipChrom(DictId::new(b"NONE", DictIdType::Field))).unwrap();
        assert_eq!(out, b"chr1\t200");
    }

    #[test]
    fn after_item_hook_observes_every_reconstructed_item() {
        let (mut table, chrom_id, pos_id) = setup_pair();
        let chrom = table.find(chrom_id).unwrap();
        let pos = table.find(pos_id).unwrap();
        table.get_mut(chrom).append_snip(b"chr1");
        table.get_mut(pos).append_snip(b"100");

        let container = Container::new(vec![
            ContainerItem::new(chrom_id).with_separator(ItemSep::single(b'\t')),
            ContainerItem::new(pos_id),
        ]);

        struct CountItems(Vec<DictId>);
        impl ContainerHooks for CountItems {
            fn after_item(&mut self, _table: &mut ContextTable, dict_id: DictId, _repeat: u32, _item_idx: usize, _out: &mut Vec<u8>) {
                self.0.push(dict_id);
            }
        }
        let mut hooks = CountItems(Vec::new());
        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut hooks).unwrap();
        assert_eq!(hooks.0, vec![chrom_id, pos_id]);
    }

    #[test]
    fn repeated_container_feeds_each_items_own_lookback_ring() {
        use crate::context::LastValue;
        use crate::snip::encode_lookback;

        let mut table = ContextTable::new();
        let gt_id = DictId::new(b"GT", DictIdType::Field);
        let dist_id = DictId::new(b"DIST", DictIdType::Field);
        let gt = table.add_context("GT", gt_id);
        let dist = table.add_context("DIST", dist_id);
        table.get_mut(gt).flags.lookback_capacity = Some(4);
        table.get_mut(dist).last_value = LastValue::Int(1);

        table.get_mut(gt).append_snip(b"0/0");
        table.get_mut(gt).append_snip(&encode_lookback(dist_id));
        table.get_mut(gt).append_snip(&encode_lookback(dist_id));

        let container = Container::new(vec![ContainerItem::new(gt_id)])
            .with_repeats(3)
            .with_repeat_sep(ItemSep::single(b'\t'));

        let mut out = Vec::new();
        container_reconstruct(&mut table, &container, &mut out, &mut NoHooks).unwrap();
        assert_eq!(out, b"0/0\t0/0\t0/0");
        assert_eq!(table.get(gt).lookback.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn container_descriptor_roundtrips_through_encode_decode() {
        let a_id = DictId::new(b"A", DictIdType::Field);
        let mut container = Container::new(vec![ContainerItem::new(a_id)
            .with_separator(ItemSep::single(b'\t'))
            .with_prefix(b"GT:".to_vec())]);
        container.repeats = 3;
        container.drop_final_repeat_sep = true;

        let encoded = container.encode();
        let decoded = Container::decode(&encoded).unwrap();
        assert_eq!(decoded.repeats, 3);
        assert!(decoded.drop_final_repeat_sep);
        assert_eq!(decoded.items.len(), 1);
        assert_eq!(decoded.items[0].dict_id, a_id);
        assert_eq!(decoded.items[0].prefix, b"GT:");
    }
}
