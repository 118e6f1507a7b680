//! End-to-end check that a file built from the on-disk section types
//! (dict/b250/local/container/codec) reconstructs byte-for-byte through
//! the public library API, independent of the CLI's own framing.

use ctxzip::codec::{get_codec, CodecId};
use ctxzip::container::{Container, ContainerItem};
use ctxzip::context::{decode_b250, encode_b250, Context, ContextTable};
use ctxzip::dict::Dict;
use ctxzip::dict_id::{DictId, DictIdType};
use ctxzip::deferred::DeferredQueue;
use ctxzip::reconstruct::{reconstruct_vb, verify_and_finish, KeepAll, ReconstructPlan};
use ctxzip::vb::{CompKind, VariantBlock};

fn seg_lines(lines: &[&str]) -> (Dict, Vec<ctxzip::context::B250Entry>, DictId) {
    let line_id = DictId::new(b"LINE", DictIdType::Field);
    let mut seg_vb = VariantBlock::new_for_seg(1, 0, CompKind::Main, Vec::new());
    let ctx_idx = seg_vb.contexts.add_context("LINE", line_id);
    for line in lines {
        seg_vb.contexts.get_mut(ctx_idx).append_snip(line.as_bytes());
    }
    let ctx = seg_vb.contexts.get(ctx_idx);
    (ctx.dict.clone(), ctx.b250.clone(), line_id)
}

#[test]
fn vb_roundtrips_through_dict_and_b250_wire_encoding() {
    let lines = ["chr1\t100\tA\tG", "chr1\t200\tC\tT", "chr2\t50\tT\tA"];
    let (dict, b250, line_id) = seg_lines(&lines);

    // Serialize exactly as the on-disk DICT/B250 sections would.
    let dict_bytes = dict.as_bytes().to_vec();
    let b250_bytes = encode_b250(&b250);
    let codec = get_codec(CodecId::Zstd);
    let dict_compressed = codec.compress(&dict_bytes).unwrap();
    let b250_compressed = codec.compress(&b250_bytes).unwrap();

    // Deserialize back into a fresh context for the Piz side.
    let restored_dict = Dict::from_bytes(&codec.decompress(&dict_compressed, dict_bytes.len()).unwrap());
    let restored_b250 = decode_b250(&codec.decompress(&b250_compressed, b250_bytes.len()).unwrap()).unwrap();

    let mut contexts = ContextTable::new();
    contexts.add_context("LINE", line_id);
    let idx = contexts.find(line_id).unwrap();
    *contexts.get_mut(idx) = Context::from_decoded("LINE", line_id, restored_dict, restored_b250, Default::default());

    let mut vb = VariantBlock::new_for_piz(1, 0, CompKind::Main, contexts);
    let mut toplevel = Container::new(vec![ContainerItem::new(line_id)]);
    toplevel.is_toplevel = true;
    let plan = ReconstructPlan {
        toplevel: &toplevel,
        declared_lines: lines.len() as u32,
    };
    let deferred = DeferredQueue::new();
    reconstruct_vb(&mut vb, &plan, &mut KeepAll, &deferred).unwrap();

    let expected: String = lines.join("");
    assert_eq!(vb.recon_buffer(), expected.as_bytes());
    verify_and_finish(&vb, expected.len(), "test.vcf").unwrap();
}

#[test]
fn reconstruction_rejects_a_short_declared_length() {
    let lines = ["onlyline"];
    let (dict, b250, line_id) = seg_lines(&lines);

    let mut contexts = ContextTable::new();
    contexts.add_context("LINE", line_id);
    let idx = contexts.find(line_id).unwrap();
    *contexts.get_mut(idx) = Context::from_decoded("LINE", line_id, dict, b250, Default::default());

    let mut vb = VariantBlock::new_for_piz(1, 0, CompKind::Main, contexts);
    let mut toplevel = Container::new(vec![ContainerItem::new(line_id)]);
    toplevel.is_toplevel = true;
    let plan = ReconstructPlan {
        toplevel: &toplevel,
        declared_lines: 1,
    };
    let deferred = DeferredQueue::new();
    reconstruct_vb(&mut vb, &plan, &mut KeepAll, &deferred).unwrap();

    assert!(verify_and_finish(&vb, 3, "test.vcf").is_err());
}
