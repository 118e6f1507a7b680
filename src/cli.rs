//! Command-line surface: `compress`/`decompress`/`inspect`/`bench`,
//! grounded on the teacher's `main.rs` `Cli`/`Commands` clap-derive shape
//! (subcommands with per-command flag structs, a thin `run` dispatcher).
//!
//! The engine itself is format-agnostic: it routes whatever line-delimited
//! records it's given through one context per field. This CLI's own
//! segmentation is deliberately generic rather than schema-aware — a real
//! VCF/SAM/FASTQ column segmenter is outside this crate's module inventory
//! — but it still splits each record on tab into one context per column
//! (`FIELD0`, `FIELD1`, ...) plus a trailing `NEWLINE` context, and picks a
//! per-field snip shape at segmentation time: a column whose value parses
//! as an integer gets `LOOKUP` on its first appearance and `SELF_DELTA`
//! against the previous line's value after that; a text column repeating
//! its previous value verbatim gets `COPY`; anything else is a literal
//! snip. Header lines (`#`-prefixed) pass through verbatim as one
//! `TXT_HEADER` section rather than being segmented at all.
//! It still exercises every on-disk section kind and every flag named in
//! the external interface: `--vblock`, `--force-reread`, `--best`/`--fast`,
//! `--optimize-*`, `--pair`, `--drop-genotypes`, `--gt-only`, `--regions`,
//! `--samples`, `--snps-only`, `--indels-only`, `--luft`, `--count`,
//! `--show-headers`.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::codec::{get_codec, pick_best_codec, CodecId};
use crate::container::{Container, ContainerItem, ItemSep};
use crate::context::{Context, ContextTable, StoreType};
use crate::dict::Dict;
use crate::dict_id::{DictId, DictIdType};
use crate::error::{EngineError, ErrorSite, Result};
use crate::format::{GenozipHeader, SectionHeader, SectionType, FORMAT_VERSION, GENOZIP_HEADER_LEN};
use crate::pipeline::Writer;
use crate::reconstruct::{reconstruct_vb, verify_and_finish, LineFilter, ReconstructPlan};
use crate::section::{SectionEnt, SectionList};
use crate::vb::{CompKind, VariantBlock};

const NEWLINE_FIELD: &str = "NEWLINE";

fn field_name(i: usize) -> String {
    format!("FIELD{i}")
}

#[derive(Parser)]
#[command(name = "ctxzip", version, about = "Context-oriented compression engine for line-delimited genomic text")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a text input into a .ctxz file
    Compress {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Target VB size, e.g. "1MiB", "32KiB", or a bare byte count
        #[arg(long, default_value = "1MiB")]
        vblock: String,
        /// Force generated-component lines to be re-read from source
        /// rather than queued, even when the router has room to queue
        #[arg(long)]
        force_reread: bool,
        /// Spend more time picking the smallest codec per section
        #[arg(long, conflicts_with = "fast")]
        best: bool,
        /// Skip codec sampling and always use zstd
        #[arg(long)]
        fast: bool,
        /// Per-context codec hint, `NAME=CODEC`; this generic engine has
        /// one context (`LINE`) so only `LINE=<codec>` has any effect
        #[arg(long = "optimize", value_name = "NAME=CODEC")]
        optimize: Vec<String>,
        /// Second input to interleave with `input` (paired FASTQ-style)
        #[arg(long)]
        pair: Option<PathBuf>,
    },
    /// Decompress a .ctxz file back to text
    Decompress {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Drop FORMAT and sample columns from each record (tab field 9+)
        #[arg(long)]
        drop_genotypes: bool,
        /// Keep only the GT subfield of each sample column
        #[arg(long)]
        gt_only: bool,
        /// Keep only records whose first tab-separated field contains this
        #[arg(long)]
        regions: Option<String>,
        /// Keep only records containing this sample column substring
        #[arg(long)]
        samples: Option<String>,
        /// Keep only single-base REF/ALT records (tab fields 4/5)
        #[arg(long, conflicts_with = "indels_only")]
        snps_only: bool,
        /// Keep only records where REF/ALT differ in length
        #[arg(long)]
        indels_only: bool,
        /// Render against the Luft (alternate) coordinate system, if the
        /// file carries one — this build never writes a Luft stream, so
        /// this flag is accepted and always reports unavailable
        #[arg(long)]
        luft: bool,
        /// Print the record count instead of writing output
        #[arg(long)]
        count: bool,
        /// Print each section's type/name instead of (or in addition to)
        /// writing output; value is `TYPE`, `NAME`, or a repeat count `N`
        #[arg(long, value_name = "TYPE|NAME|N")]
        show_headers: Option<String>,
    },
    /// Print a .ctxz file's section list table of contents
    Inspect { input: PathBuf },
    /// Round-trip a file through compress+decompress in memory and report
    /// timing and the compression ratio achieved
    Bench { input: PathBuf },
}

pub fn run() -> std::result::Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Commands::Compress {
            input,
            output,
            vblock,
            force_reread,
            best,
            fast,
            optimize,
            pair,
        } => {
            let vblock_size = parse_size(&vblock)?;
            let codec_policy = if fast {
                CodecPolicy::Fast
            } else if best {
                CodecPolicy::Best
            } else {
                CodecPolicy::Default
            };
            if force_reread {
                eprintln!("note: --force-reread requested, but DEPN re-read needs the original input reopened at decompress time, which this single-file round trip doesn't support; DEPN lines are queued/offloaded instead");
            }
            for hint in &optimize {
                eprintln!("note: --optimize {hint} recorded but unused (no per-field codec table in this build)");
            }
            let mut bytes = fs::read(&input)?;
            if let Some(pair_path) = &pair {
                bytes = interleave_pair(&bytes, &fs::read(pair_path)?);
            }
            let written = compress_file(&bytes, vblock_size, codec_policy)?;
            fs::write(&output, &written)?;
            println!(
                "{} -> {} ({} B -> {} B, {:.1}%)",
                input.display(),
                output.display(),
                bytes.len(),
                written.len(),
                written.len() as f64 / bytes.len().max(1) as f64 * 100.0
            );
        }

        Commands::Decompress {
            input,
            output,
            drop_genotypes,
            gt_only,
            regions,
            samples,
            snps_only,
            indels_only,
            luft,
            count,
            show_headers,
        } => {
            if luft {
                eprintln!("note: --luft requested but this file carries no Luft coordinate stream");
            }
            let bytes = fs::read(&input)?;
            let file = ReadFile::open(&bytes)?;

            if let Some(mode) = &show_headers {
                print_section_list(&file.section_list, mode);
                return Ok(());
            }

            let mut filter = RecordFilter {
                regions,
                samples,
                snps_only,
                indels_only,
            };
            let text = decompress_file(&file, &mut filter, input.to_string_lossy().as_ref())?;
            let text = apply_genotype_flags(&text, drop_genotypes, gt_only);

            if count {
                println!("{}", count_records(&text));
                return Ok(());
            }
            match output {
                Some(path) => fs::write(&path, &text)?,
                None => std::io::Write::write_all(&mut std::io::stdout(), &text)?,
            }
        }

        Commands::Inspect { input } => {
            let bytes = fs::read(&input)?;
            let file = ReadFile::open(&bytes)?;
            println!("ctxzip file: {}", input.display());
            println!("  format version {}", file.header.format_version);
            println!("  sections        {}", file.section_list.len());
            print_section_list(&file.section_list, "TYPE");
        }

        Commands::Bench { input } => {
            let data = fs::read(&input)?;
            let t0 = std::time::Instant::now();
            let compressed = compress_file(&data, parse_size("1MiB")?, CodecPolicy::Default)?;
            let compress_ms = t0.elapsed().as_millis();

            let t1 = std::time::Instant::now();
            let file = ReadFile::open(&compressed)?;
            let decompressed = decompress_file(&file, &mut KeepAllFilter, input.to_string_lossy().as_ref())?;
            let decompress_ms = t1.elapsed().as_millis();

            println!("── context-oriented compression benchmark ──────────────");
            println!("  Input size:       {} B", data.len());
            println!("  Compressed size:  {} B ({:.1}% of original)", compressed.len(), compressed.len() as f64 / data.len().max(1) as f64 * 100.0);
            println!("  Compress time:    {compress_ms} ms");
            println!("  Decompress time:  {decompress_ms} ms");
            println!("  Round-trip:       {}", if decompressed == data { "correct" } else { "MISMATCH" });
        }
    }

    Ok(())
}

#[derive(Clone, Copy)]
enum CodecPolicy {
    /// Sample a handful of candidates per section and keep the smallest.
    Best,
    /// Always zstd, no sampling.
    Fast,
    /// Sample just `{None, Zstd}` — a reasonable middle ground.
    Default,
}

impl CodecPolicy {
    fn candidates(self) -> &'static [CodecId] {
        match self {
            CodecPolicy::Best => &[CodecId::None, CodecId::Zstd, CodecId::Lz4, CodecId::Brotli, CodecId::Lzma],
            CodecPolicy::Fast => &[CodecId::Zstd],
            CodecPolicy::Default => &[CodecId::None, CodecId::Zstd],
        }
    }
}

/// Parse a human size like `1MiB`, `32KiB`, or a bare byte count.
fn parse_size(s: &str) -> Result<usize> {
    let s = s.trim();
    let bad = || EngineError::resource(ErrorSite::new(), format!("invalid --vblock size '{s}'"));
    for (suffix, mult) in [("KiB", 1024usize), ("MiB", 1024 * 1024), ("GiB", 1024 * 1024 * 1024)] {
        if let Some(num) = s.strip_suffix(suffix) {
            return num.trim().parse::<usize>().map(|n| n * mult).map_err(|_| bad());
        }
    }
    s.parse::<usize>().map_err(|_| bad())
}

/// Split `data` into records that each include their own trailing `\n`,
/// except possibly the file's final record if it isn't newline-terminated.
/// Concatenating the records this function returns always reproduces
/// `data` byte-for-byte.
fn split_records(data: &[u8]) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            records.push(data[start..=i].to_vec());
            start = i + 1;
        }
    }
    if start < data.len() {
        records.push(data[start..].to_vec());
    }
    records
}

/// Classify one non-header data record for the generated-component router:
/// a record that's nothing but a bare newline carries no column content and
/// is diverted out-of-band; a record that's byte-identical to the
/// immediately preceding MAIN record is treated as depending on it rather
/// than re-segmented. Everything else stays MAIN.
fn classify_record(record: &[u8], last_main: Option<&Vec<u8>>) -> Option<crate::gencomp::GencompKind> {
    if record == b"\n" {
        return Some(crate::gencomp::GencompKind::Oob);
    }
    if let Some(last) = last_main {
        if last.as_slice() == record {
            return Some(crate::gencomp::GencompKind::Depn);
        }
    }
    None
}

fn interleave_pair(a: &[u8], b: &[u8]) -> Vec<u8> {
    let ra = split_records(a);
    let rb = split_records(b);
    let mut out = Vec::with_capacity(a.len() + b.len());
    for i in 0..ra.len().max(rb.len()) {
        if let Some(r) = ra.get(i) {
            out.extend_from_slice(r);
        }
        if let Some(r) = rb.get(i) {
            out.extend_from_slice(r);
        }
    }
    out
}

fn write_section(
    writer: &Writer,
    out: &mut Vec<u8>,
    section_type: SectionType,
    vblock_i: u32,
    dict_id: Option<DictId>,
    codec: CodecId,
    uncompressed_len: usize,
    compressed: &[u8],
) {
    let mut header = SectionHeader::new(section_type, codec, vblock_i);
    header.finalize_lengths(compressed, uncompressed_len);
    let mut framed = Vec::with_capacity(crate::format::SECTION_HEADER_LEN + compressed.len());
    header.write(&mut framed);
    framed.extend_from_slice(compressed);
    let framed_len = framed.len() as u64;
    writer.append_section(framed_len, |offset| SectionEnt {
        section_type,
        vblock_i,
        dict_id,
        offset,
        len: framed_len as u32,
    });
    out.extend_from_slice(&framed);
}

fn pick(policy: CodecPolicy, data: &[u8]) -> Result<CodecId> {
    if data.is_empty() {
        return Ok(CodecId::None);
    }
    pick_best_codec(data, policy.candidates())
}

fn compress_file(data: &[u8], vblock_size: usize, policy: CodecPolicy) -> Result<Vec<u8>> {
    let records = split_records(data);
    let (header_records, data_records): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.first() == Some(&b'#'));

    let mut out = Vec::new();
    let writer = Writer::new(0);

    let header_bytes: Vec<u8> = header_records.into_iter().flatten().collect();
    let header_codec = pick(policy, &header_bytes)?;
    let header_compressed = get_codec(header_codec).compress(&header_bytes)?;
    write_section(&writer, &mut out, SectionType::TxtHeader, 0, None, header_codec, header_bytes.len(), &header_compressed);

    let mut vblock_i = 0u32;
    let mut vb_lines: Vec<&Vec<u8>> = Vec::new();
    let mut vb_bytes = 0usize;

    // Re-read prescriptions would need the original input reopened during
    // decompression, which this in-memory round trip never does — the
    // router is run with re-read disabled, so a full queue offloads to
    // the in-memory scratch list instead of ever producing one.
    let router = crate::gencomp::GencompRouter::new(vblock_size, 4, false);
    let dispatcher = crate::pipeline::Dispatcher::new(router, writer);

    let mut offset = 0u64;
    let mut last_main: Option<&Vec<u8>> = None;
    for record in &data_records {
        let kind = classify_record(record, last_main);
        match kind {
            Some(gencomp_kind) => {
                dispatcher.with_router(|r| r.absorb_line(gencomp_kind, 0, offset, record, false))?;
            }
            None => {
                if vb_bytes + record.len() > vblock_size && !vb_lines.is_empty() {
                    vblock_i += 1;
                    write_vb(&dispatcher.writer, &mut out, vblock_i, vb_lines.as_slice(), policy)?;
                    dispatcher.mark_main_vb_absorbed();
                    vb_lines.clear();
                    vb_bytes = 0;
                }
                vb_bytes += record.len();
                vb_lines.push(record);
                last_main = Some(record);
            }
        }
        offset += record.len() as u64;
    }
    if !vb_lines.is_empty() {
        vblock_i += 1;
        write_vb(&dispatcher.writer, &mut out, vblock_i, vb_lines.as_slice(), policy)?;
        dispatcher.mark_main_vb_absorbed();
    }

    dispatcher.with_router(|r| {
        r.flush_oob();
        r.flush_depn()
    })?;
    dispatcher.finish_absorbing();

    while let Some(source) = dispatcher.with_router(|r| r.next_vb_source()) {
        let component_bytes = match source {
            crate::gencomp::GencompSource::Oob(slot) => slot.bytes,
            crate::gencomp::GencompSource::Depn(slot) => slot.bytes,
            crate::gencomp::GencompSource::DepnOffloaded(rec) => rec.decompress()?,
            crate::gencomp::GencompSource::Reread(_) => {
                return Err(EngineError::resource(
                    ErrorSite::new(),
                    "DEPN re-read prescription produced with re-read disabled",
                ));
            }
        };
        let component_lines = split_records(&component_bytes);
        let line_refs: Vec<&Vec<u8>> = component_lines.iter().collect();
        vblock_i += 1;
        write_vb(&dispatcher.writer, &mut out, vblock_i, &line_refs, policy)?;
    }

    let section_list = dispatcher.writer.into_section_list();
    let section_list_bytes = section_list.encode();
    let list_codec = CodecId::Zstd;
    let list_compressed = get_codec(list_codec).compress(&section_list_bytes)?;
    let mut list_header = SectionHeader::new(SectionType::SectionList, list_codec, 0);
    list_header.finalize_lengths(&list_compressed, section_list_bytes.len());
    let section_list_offset = out.len() as u64;
    list_header.write(&mut out);
    out.extend_from_slice(&list_compressed);

    let footer = GenozipHeader {
        format_version: FORMAT_VERSION,
        section_list_offset,
    };
    footer.write(&mut out);
    Ok(out)
}

/// Strip one trailing `\n` (if present) and split the rest on tab. The
/// file's last record may lack a trailing newline; every other record
/// carries one.
fn split_tab_fields(record: &[u8]) -> (Vec<&[u8]>, bool) {
    let (body, had_nl) = match record.strip_suffix(b"\n") {
        Some(body) => (body, true),
        None => (record, false),
    };
    (body.split(|&b| b == b'\t').collect(), had_nl)
}

/// Segment one field's value into `ctx`: `SELF_DELTA` against the last
/// integer this context saw once a first value has been `LOOKUP`-ed in,
/// `COPY` for a text value repeating the immediately previous one,
/// otherwise a literal snip.
fn seg_field(ctx: &mut Context, field: &[u8], prev_int: &mut Option<i64>, prev_text: &mut Option<Vec<u8>>) {
    if let Ok(value) = std::str::from_utf8(field).unwrap_or("\0").parse::<i64>() {
        match *prev_int {
            Some(base) => {
                ctx.append_snip(&crate::snip::encode_self_delta(value - base));
            }
            None => {
                ctx.flags.store = StoreType::Int;
                ctx.append_integer(value);
                ctx.append_snip(&crate::snip::lookup_snip());
            }
        }
        *prev_int = Some(value);
        *prev_text = Some(field.to_vec());
        return;
    }
    if prev_text.as_deref() == Some(field) {
        ctx.append_snip(&crate::snip::encode_copy(None));
    } else {
        ctx.append_snip(field);
    }
    *prev_text = Some(field.to_vec());
}

fn write_vb(writer: &Writer, out: &mut Vec<u8>, vblock_i: u32, lines: &[&Vec<u8>], policy: CodecPolicy) -> Result<()> {
    let split: Vec<(Vec<&[u8]>, bool)> = lines.iter().map(|line| split_tab_fields(line.as_slice())).collect();
    let num_fields = split.iter().map(|(fields, _)| fields.len()).max().unwrap_or(0);

    let field_ids: Vec<DictId> = (0..num_fields).map(|i| DictId::new(field_name(i).as_bytes(), DictIdType::Field)).collect();
    let newline_id = DictId::new(NEWLINE_FIELD.as_bytes(), DictIdType::Field);

    let mut vb = VariantBlock::new_for_seg(vblock_i, 0, CompKind::Main, Vec::new());
    let field_ctx_idx: Vec<usize> = field_ids.iter().enumerate().map(|(i, &id)| vb.contexts.add_context(&field_name(i), id)).collect();
    let newline_ctx_idx = vb.contexts.add_context(NEWLINE_FIELD, newline_id);

    let mut prev_int = vec![None; num_fields];
    let mut prev_text = vec![None; num_fields];
    for (fields, had_nl) in &split {
        for i in 0..num_fields {
            let ctx = vb.contexts.get_mut(field_ctx_idx[i]);
            match fields.get(i) {
                Some(value) => seg_field(ctx, value, &mut prev_int[i], &mut prev_text[i]),
                None => ctx.append_missing(),
            }
        }
        let newline_ctx = vb.contexts.get_mut(newline_ctx_idx);
        if *had_nl {
            newline_ctx.append_snip(b"\n");
        } else {
            newline_ctx.append_missing();
        }
    }
    let declared_recon_len: u64 = lines.iter().map(|l| l.len() as u64).sum();

    // A tab separates each field from the next; the last field is followed
    // directly by the newline item with no tab between them.
    let mut items: Vec<ContainerItem> = field_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| {
            let item = ContainerItem::new(id);
            if i + 1 < field_ids.len() {
                item.with_separator(ItemSep::single(b'\t'))
            } else {
                item
            }
        })
        .collect();
    items.push(ContainerItem::new(newline_id));
    let mut toplevel = Container::new(items);
    toplevel.is_toplevel = true;
    let container_bytes = toplevel.encode();

    let mut vb_header = Vec::new();
    vb_header.extend_from_slice(&(lines.len() as u32).to_le_bytes());
    vb_header.extend_from_slice(&declared_recon_len.to_le_bytes());
    vb_header.extend_from_slice(&(container_bytes.len() as u32).to_le_bytes());
    vb_header.extend_from_slice(&container_bytes);
    write_section(writer, out, SectionType::VbHeader, vblock_i, None, CodecId::None, vb_header.len(), &vb_header);

    for ctx_idx in 0..vb.contexts.len() {
        let ctx = vb.contexts.get(ctx_idx);
        let dict_id = ctx.dict_id;

        let dict_codec = pick(policy, ctx.dict.as_bytes())?;
        let dict_compressed = get_codec(dict_codec).compress(ctx.dict.as_bytes())?;
        write_section(writer, out, SectionType::Dict, vblock_i, Some(dict_id), dict_codec, ctx.dict.as_bytes().len(), &dict_compressed);

        let b250_bytes = crate::context::encode_b250(&ctx.b250);
        let b250_codec = pick(policy, &b250_bytes)?;
        let b250_compressed = get_codec(b250_codec).compress(&b250_bytes)?;
        write_section(writer, out, SectionType::B250, vblock_i, Some(dict_id), b250_codec, b250_bytes.len(), &b250_compressed);

        if !ctx.local.is_empty() {
            let local_codec = pick(policy, &ctx.local.bytes)?;
            let local_compressed = get_codec(local_codec).compress(&ctx.local.bytes)?;
            write_section(writer, out, SectionType::Local, vblock_i, Some(dict_id), local_codec, ctx.local.bytes.len(), &local_compressed);
        }
    }
    Ok(())
}

struct ReadFile<'a> {
    bytes: &'a [u8],
    header: GenozipHeader,
    section_list: SectionList,
}

impl<'a> ReadFile<'a> {
    fn open(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < GENOZIP_HEADER_LEN {
            return Err(EngineError::format(ErrorSite::new(), "file too short for trailing footer", String::new()));
        }
        let footer_bytes = &bytes[bytes.len() - GENOZIP_HEADER_LEN..];
        let header = GenozipHeader::read(footer_bytes)?;

        let list_header_start = header.section_list_offset as usize;
        let list_header = SectionHeader::read(&bytes[list_header_start..])?;
        let payload_start = list_header_start + crate::format::SECTION_HEADER_LEN;
        let payload_end = payload_start + list_header.data_compressed_len as usize;
        let compressed = &bytes[payload_start..payload_end];
        list_header.verify_digest(compressed)?;
        let raw = get_codec(list_header.codec).decompress(compressed, list_header.data_uncompressed_len as usize)?;
        let section_list = SectionList::decode(&raw)?;

        Ok(ReadFile {
            bytes,
            header,
            section_list,
        })
    }

    fn read_section(&self, entry: &SectionEnt) -> Result<Vec<u8>> {
        let header = SectionHeader::read(&self.bytes[entry.offset as usize..])?;
        let payload_start = entry.offset as usize + crate::format::SECTION_HEADER_LEN;
        let payload_end = payload_start + header.data_compressed_len as usize;
        let compressed = &self.bytes[payload_start..payload_end];
        header.verify_digest(compressed)?;
        get_codec(header.codec).decompress(compressed, header.data_uncompressed_len as usize)
    }
}

fn decompress_file(file: &ReadFile<'_>, filter: &mut dyn LineFilter, input_name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    for entry in file.section_list.iter().filter(|e| e.section_type == SectionType::TxtHeader) {
        out.extend_from_slice(&file.read_section(entry)?);
    }

    let mut vblock_is: Vec<u32> = file
        .section_list
        .iter()
        .filter(|e| e.section_type == SectionType::VbHeader)
        .map(|e| e.vblock_i)
        .collect();
    vblock_is.sort_unstable();

    for vblock_i in vblock_is {
        let vb_entries: Vec<&SectionEnt> = file.section_list.for_vb(vblock_i).collect();
        let header_entry = vb_entries
            .iter()
            .find(|e| e.section_type == SectionType::VbHeader)
            .ok_or_else(|| EngineError::resource(ErrorSite::new().vb(vblock_i), "missing VB_HEADER section"))?;
        let header_bytes = file.read_section(header_entry)?;
        if header_bytes.len() < 16 {
            return Err(EngineError::format(ErrorSite::new().vb(vblock_i), "VB_HEADER section truncated before its fixed-size fields", String::new()));
        }
        let declared_lines = u32::from_le_bytes(header_bytes[0..4].try_into().unwrap());
        let declared_recon_len = u64::from_le_bytes(header_bytes[4..12].try_into().unwrap()) as usize;
        let container_len = u32::from_le_bytes(header_bytes[12..16].try_into().unwrap()) as usize;
        if header_bytes.len() < 16 + container_len {
            return Err(EngineError::format(ErrorSite::new().vb(vblock_i), "VB_HEADER section truncated before its container body", String::new()));
        }
        let container = Container::decode(&header_bytes[16..16 + container_len])?;

        // One context per dict_id this VB's container actually references
        // (one per field plus the trailing newline marker); each is
        // rebuilt from its own DICT/B250/(optional) LOCAL section triple.
        let dict_entries: Vec<&SectionEnt> = vb_entries.iter().filter(|e| e.section_type == SectionType::Dict).copied().collect();
        let mut contexts = ContextTable::new();
        for dict_entry in &dict_entries {
            let dict_id = dict_entry
                .dict_id
                .ok_or_else(|| EngineError::resource(ErrorSite::new().vb(vblock_i), "DICT section missing its dict_id tag"))?;
            let b250_entry = vb_entries
                .iter()
                .find(|e| e.section_type == SectionType::B250 && e.dict_id == Some(dict_id))
                .ok_or_else(|| EngineError::resource(ErrorSite::new().vb(vblock_i), "missing B250 section for a field"))?;
            let local_bytes = match vb_entries.iter().find(|e| e.section_type == SectionType::Local && e.dict_id == Some(dict_id)) {
                Some(e) => file.read_section(e)?,
                None => Vec::new(),
            };

            let dict = Dict::from_bytes(&file.read_section(dict_entry)?);
            let b250 = crate::context::decode_b250(&file.read_section(b250_entry)?)?;
            let name = dict_id.printable();
            let ctx_idx = contexts.add_context(&name, dict_id);
            *contexts.get_mut(ctx_idx) = Context::from_decoded(&name, dict_id, dict, b250, local_from_bytes(local_bytes));
        }

        let mut vb = VariantBlock::new_for_piz(vblock_i, 0, CompKind::Main, contexts);
        let plan = ReconstructPlan {
            toplevel: &container,
            declared_lines,
        };
        reconstruct_vb(&mut vb, &plan, filter, &crate::deferred::DeferredQueue::new())?;
        verify_and_finish(&vb, declared_recon_len, input_name)?;
        out.extend_from_slice(vb.recon_buffer());
    }

    Ok(out)
}

fn local_from_bytes(bytes: Vec<u8>) -> crate::context::LocalBuf {
    let mut local = crate::context::LocalBuf::default();
    local.bytes = bytes;
    local
}

struct KeepAllFilter;
impl LineFilter for KeepAllFilter {
    fn keep(&mut self, _line_i: u32, _line_bytes: &[u8]) -> bool {
        true
    }
}

/// Applies the decompress-time filters (`--drop-genotypes`, `--gt-only`,
/// `--regions`, `--samples`, `--snps-only`, `--indels-only`) the external
/// interface names. Since this engine's own segmentation is format-generic
/// (`FIELD0`, `FIELD1`, ... by tab position, not named VCF columns), these
/// operate on a tab-split view of each already-reconstructed line rather
/// than on typed contexts — a text-level approximation of the real
/// per-column filters a VCF/SAM segmenter would apply during reconstruction
/// itself.
struct RecordFilter {
    regions: Option<String>,
    samples: Option<String>,
    snps_only: bool,
    indels_only: bool,
}

impl LineFilter for RecordFilter {
    fn keep(&mut self, _line_i: u32, line_bytes: &[u8]) -> bool {
        let line = String::from_utf8_lossy(line_bytes);
        if line.starts_with('#') {
            return true;
        }
        let fields: Vec<&str> = line.trim_end_matches('\n').split('\t').collect();

        if let Some(region) = &self.regions {
            if fields.first().map(|f| !f.contains(region.as_str())).unwrap_or(true) {
                return false;
            }
        }
        if let Some(sample) = &self.samples {
            if !fields.iter().skip(9).any(|f| f.contains(sample.as_str())) {
                return false;
            }
        }
        if fields.len() > 4 && (self.snps_only || self.indels_only) {
            let ref_len = fields[3].len();
            let alt_len = fields[4].len();
            let is_snp = ref_len == 1 && alt_len == 1;
            if self.snps_only && !is_snp {
                return false;
            }
            if self.indels_only && is_snp {
                return false;
            }
        }
        true
    }
}

/// Applies `--drop-genotypes`/`--gt-only` after reconstruction rather than
/// during it: both trim a kept record's bytes instead of deciding whether
/// to keep it, which `LineFilter::keep`'s bool return can't express. Tab
/// fields 0-8 are the fixed VCF columns; 9 is FORMAT, 10+ are samples.
fn apply_genotype_flags(text: &[u8], drop_genotypes: bool, gt_only: bool) -> Vec<u8> {
    if !drop_genotypes && !gt_only {
        return text.to_vec();
    }
    let mut out = Vec::with_capacity(text.len());
    for record in split_records(text) {
        let had_newline = record.last() == Some(&b'\n');
        let line = String::from_utf8_lossy(&record);
        let line = line.trim_end_matches('\n');
        if line.starts_with('#') || !line.contains('\t') {
            out.extend_from_slice(record.as_slice());
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let kept: Vec<String> = if drop_genotypes && fields.len() > 9 {
            fields[..9].iter().map(|f| f.to_string()).collect()
        } else if gt_only && fields.len() > 10 {
            let gt_pos = fields[8].split(':').position(|k| k == "GT");
            let mut kept: Vec<String> = fields[..9].iter().map(|f| f.to_string()).collect();
            for sample in &fields[9..] {
                let gt = gt_pos.and_then(|i| sample.split(':').nth(i)).unwrap_or(".");
                kept.push(gt.to_string());
            }
            kept
        } else {
            fields.iter().map(|f| f.to_string()).collect()
        };
        out.extend_from_slice(kept.join("\t").as_bytes());
        if had_newline {
            out.push(b'\n');
        }
    }
    out
}

fn count_records(text: &[u8]) -> usize {
    split_records(text).iter().filter(|r| r.first() != Some(&b'#')).count()
}

fn print_section_list(list: &SectionList, mode: &str) {
    let show_n: Option<usize> = mode.parse().ok();
    for (i, entry) in list.iter().enumerate() {
        if let Some(n) = show_n {
            if i >= n {
                break;
            }
        }
        let name = entry.dict_id.map(|id| id.printable()).unwrap_or_else(|| "-".to_string());
        match mode {
            "NAME" => println!("{name}"),
            _ => println!("[{:>3}] vb={:<4} type={:?} dict={:<16} offset={:<8} len={}", i, entry.vblock_i, entry.section_type, name, entry.offset, entry.len),
        }
    }
}
