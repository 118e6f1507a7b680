//! 2-bit packed ACGT codec, with a parallel exception stream running the
//! same length as the input. Every base — including lowercase `acgt` —
//! packs through the 2-bit path; the exception stream records only how to
//! restore what the 2-bit path can't express: case, and anything that
//! isn't a base at all (`N`, IUPAC ambiguity codes).
//!
//! # On-disk layout (post-header, all integers little-endian)
//! | Field                    | Size     |
//! |---------------------------|---------|
//! | `n_bases`                 | 4 bytes |
//! | `exceptions_subcodec`     | 1 byte  |
//! | `exceptions_len`          | 4 bytes |
//! | `exceptions` (compressed) | variable |
//! | `packed_subcodec`         | 1 byte  |
//! | `packed_len`              | 4 bytes |
//! | `packed` (compressed)     | variable |
//!
//! The exception stream is dense: one byte per input base, so
//! `exceptions.len() == n_bases` always. Byte `0` means "uppercase base,
//! use the packed 2 bits as-is"; byte `1` means "same base, lowercase";
//! any other byte is the literal original character, and the packed bits
//! at that position are a placeholder ignored on reconstruction. Mostly-
//! clean sequence data is then mostly zeros, which compresses away to
//! almost nothing under the sub-codec.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::generic::{LzmaCodec, NoneCodec};
use crate::codec::{Codec, CodecId};
use crate::error::{EngineError, ErrorSite, Result};

/// Below this many bytes, a sub-stream is stored raw rather than run
/// through LZMA — the codec header overhead isn't worth it.
const SUBCODEC_THRESHOLD: usize = 256;

const SUB_STORE: u8 = 0;
const SUB_LZMA: u8 = 1;

const EXC_SAME: u8 = 0;
const EXC_LOWER: u8 = 1;

fn base_to_bits(b: u8) -> Option<u8> {
    match b {
        b'A' | b'a' => Some(0b00),
        b'C' | b'c' => Some(0b01),
        b'G' | b'g' => Some(0b10),
        b'T' | b't' => Some(0b11),
        _ => None,
    }
}

fn bits_to_base(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b10 => b'G',
        _ => b'T',
    }
}

/// Pack `data` into 2-bit bases plus a same-length exception stream.
/// Bases that aren't `ACGTacgt` pack as a placeholder `0b00` and are
/// fully restored from their exception byte on unpack.
fn pack(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut packed = vec![0u8; (data.len() + 3) / 4];
    let mut exceptions = Vec::with_capacity(data.len());
    for (i, &b) in data.iter().enumerate() {
        let (bits, exc) = match base_to_bits(b) {
            Some(bits) if b.is_ascii_uppercase() => (bits, EXC_SAME),
            Some(bits) => (bits, EXC_LOWER),
            None => (0b00, b),
        };
        packed[i / 4] |= bits << ((i % 4) * 2);
        exceptions.push(exc);
    }
    (packed, exceptions)
}

fn unpack(packed: &[u8], n_bases: usize, exceptions: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(n_bases);
    for i in 0..n_bases {
        let byte = packed[i / 4];
        let bits = (byte >> ((i % 4) * 2)) & 0b11;
        let base = bits_to_base(bits);
        out.push(match exceptions[i] {
            EXC_SAME => base,
            EXC_LOWER => base + 32,
            literal => literal,
        });
    }
    out
}

fn sub_compress(data: &[u8]) -> Result<(u8, Vec<u8>)> {
    if data.len() < SUBCODEC_THRESHOLD {
        Ok((SUB_STORE, data.to_vec()))
    } else {
        Ok((SUB_LZMA, LzmaCodec.compress(data)?))
    }
}

fn sub_decompress(sub: u8, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
    match sub {
        SUB_STORE => NoneCodec.decompress(data, uncompressed_len),
        SUB_LZMA => LzmaCodec.decompress(data, uncompressed_len),
        _ => Err(EngineError::Codec {
            site: ErrorSite::new(),
            detail: format!("acgt: unknown sub-codec tag {sub}"),
        }),
    }
}

pub struct AcgtCodec;

impl Codec for AcgtCodec {
    fn id(&self) -> CodecId {
        CodecId::Acgt
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (packed, exceptions) = pack(data);

        let (exc_sub, exc_compressed) = sub_compress(&exceptions)?;
        let (pack_sub, pack_compressed) = sub_compress(&packed)?;

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_u8(exc_sub).unwrap();
        out.write_u32::<LittleEndian>(exc_compressed.len() as u32).unwrap();
        out.extend_from_slice(&exc_compressed);
        out.write_u8(pack_sub).unwrap();
        out.write_u32::<LittleEndian>(pack_compressed.len() as u32).unwrap();
        out.extend_from_slice(&pack_compressed);
        Ok(out)
    }

    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        let mut cursor = data;
        let truncated = || EngineError::Codec {
            site: ErrorSite::new(),
            detail: "acgt: truncated codec blob".to_string(),
        };

        let n_bases = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())? as usize;
        let exc_sub = cursor.read_u8().map_err(|_| truncated())?;
        let exc_len = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())? as usize;
        if cursor.len() < exc_len {
            return Err(truncated());
        }
        let (exc_compressed, rest) = cursor.split_at(exc_len);
        cursor = rest;
        let exceptions = sub_decompress(exc_sub, exc_compressed, n_bases)?;

        let pack_sub = cursor.read_u8().map_err(|_| truncated())?;
        let pack_len = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())? as usize;
        if cursor.len() < pack_len {
            return Err(truncated());
        }
        let (pack_compressed, _) = cursor.split_at(pack_len);
        let packed = sub_decompress(pack_sub, pack_compressed, (n_bases + 3) / 4)?;

        if exceptions.len() != n_bases {
            return Err(truncated());
        }
        let result = unpack(&packed, n_bases, &exceptions);
        if result.len() != uncompressed_len && uncompressed_len != 0 {
            return Err(EngineError::Codec {
                site: ErrorSite::new(),
                detail: format!(
                    "acgt: reconstructed length {} does not match declared length {}",
                    result.len(),
                    uncompressed_len
                ),
            });
        }
        Ok(result)
    }

    fn estimate_size(&self, data: &[u8]) -> usize {
        // Packed size dominates for mostly-clean sequence data; this avoids
        // paying for the sub-codec compression pass just to rank candidates.
        (data.len() + 3) / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_mixed_case_and_ambiguity_codes() {
        let data = b"ACgTNa";
        let compressed = AcgtCodec.compress(data).unwrap();
        let decompressed = AcgtCodec.decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn pure_uppercase_acgt_has_an_all_zero_exception_stream() {
        let data = b"ACGTACGTACGT";
        let (_, exceptions) = pack(data);
        assert_eq!(exceptions.len(), data.len());
        assert!(exceptions.iter().all(|&e| e == EXC_SAME));
    }

    #[test]
    fn lowercase_bases_pack_through_the_two_bit_path() {
        let data = b"acgtACGT";
        let (packed, exceptions) = pack(data);
        assert_eq!(exceptions, vec![EXC_LOWER, EXC_LOWER, EXC_LOWER, EXC_LOWER, EXC_SAME, EXC_SAME, EXC_SAME, EXC_SAME]);
        // both halves pack to the same 2-bit pattern, only the exception differs
        assert_eq!(packed[0], packed[1]);
    }

    #[test]
    fn packed_size_is_roughly_a_quarter_of_input() {
        let data = vec![b'A'; 4000];
        let compressed = AcgtCodec.compress(&data).unwrap();
        // header + packed (~1000 bytes, further reduced by the LZMA
        // sub-codec since it's all-zero) must be far smaller than the input.
        assert!(compressed.len() < data.len() / 2);
    }

    #[test]
    fn roundtrips_large_buffer_through_the_lzma_subcodec_path() {
        let mut data = Vec::new();
        for i in 0..5000 {
            data.push(match i % 7 {
                0 => b'N',
                1 => b'a',
                _ => b"ACGT"[i % 4],
            });
        }
        let compressed = AcgtCodec.compress(&data).unwrap();
        let decompressed = AcgtCodec.decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn empty_input_roundtrips() {
        let data: &[u8] = b"";
        let compressed = AcgtCodec.compress(data).unwrap();
        let decompressed = AcgtCodec.decompress(&compressed, 0).unwrap();
        assert_eq!(decompressed, data);
    }
}
