//! Thin wrappers over general-purpose entropy coders, each satisfying the
//! `Codec` contract. Mirrors the teacher's `NoneCodec`/`ZstdCodec`/
//! `Lz4Codec`/`BrotliCodec`/`LzmaCodec` almost verbatim — only the
//! identity layer (UUID → `CodecId`) and the error type changed.

use std::io::{Cursor, Read, Write};

use crate::codec::{Codec, CodecId};
use crate::error::{EngineError, ErrorSite, Result};

const ZSTD_LEVEL: i32 = 19;
const BROTLI_QUALITY: u32 = 9;
const BROTLI_LGWIN: u32 = 22;
const BROTLI_BUFFER: usize = 4096;

fn codec_err(detail: impl Into<String>) -> EngineError {
    EngineError::Codec {
        site: ErrorSite::new(),
        detail: detail.into(),
    }
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn id(&self) -> CodecId {
        CodecId::None
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8], _uncompressed_len: usize) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
    fn estimate_size(&self, data: &[u8]) -> usize {
        data.len()
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| codec_err(format!("zstd compress: {e}")))
    }
    fn decompress(&self, data: &[u8], _uncompressed_len: usize) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| codec_err(format!("zstd decompress: {e}")))
    }
    fn estimate_size(&self, data: &[u8]) -> usize {
        self.compress(data).map(|v| v.len()).unwrap_or(data.len())
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8], _uncompressed_len: usize) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| codec_err(format!("lz4 decompress: {e}")))
    }
    fn estimate_size(&self, data: &[u8]) -> usize {
        self.compress(data).map(|v| v.len()).unwrap_or(data.len())
    }
}

pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn id(&self) -> CodecId {
        CodecId::Brotli
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_LGWIN);
            w.write_all(data).map_err(|e| codec_err(format!("brotli compress: {e}")))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8], _uncompressed_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, BROTLI_BUFFER)
            .read_to_end(&mut out)
            .map_err(|e| codec_err(format!("brotli decompress: {e}")))?;
        Ok(out)
    }
    fn estimate_size(&self, data: &[u8]) -> usize {
        self.compress(data).map(|v| v.len()).unwrap_or(data.len())
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn id(&self) -> CodecId {
        CodecId::Lzma
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out).map_err(|e| codec_err(format!("lzma compress: {e}")))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8], _uncompressed_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut out).map_err(|e| codec_err(format!("lzma decompress: {e}")))?;
        Ok(out)
    }
    fn estimate_size(&self, data: &[u8]) -> usize {
        self.compress(data).map(|v| v.len()).unwrap_or(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: &dyn Codec, data: &[u8]) {
        let compressed = codec.compress(data).unwrap();
        let decompressed = codec.decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn none_roundtrips() {
        roundtrip(&NoneCodec, b"some arbitrary bytes\x00\x01\x02");
    }

    #[test]
    fn zstd_roundtrips() {
        roundtrip(&ZstdCodec, "chr1\tchr1\tchr1\tchr2\tchr2\n".repeat(50).as_bytes());
    }

    #[test]
    fn lz4_roundtrips() {
        roundtrip(&Lz4Codec, "AAAABBBBCCCCDDDD".repeat(20).as_bytes());
    }

    #[test]
    fn brotli_roundtrips() {
        roundtrip(&BrotliCodec, "the quick brown fox jumps over the lazy dog ".repeat(10).as_bytes());
    }

    #[test]
    fn lzma_roundtrips() {
        roundtrip(&LzmaCodec, b"PASS\nPASS\nq10\nPASS\n");
    }
}
