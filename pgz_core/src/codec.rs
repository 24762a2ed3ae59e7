use std::io::Read;

/// Single-member compression primitive used by the Archiver.
///
/// Each `Codec` implementation:
/// - Must compress and decompress blocks independently; no cross-block state.
///   This is what lets the workers run blocks in any order.
/// - Must produce one self-contained gzip member per block, embedding `extra`
///   verbatim as the header's FEXTRA payload. The Archiver later writes the
///   member's length into that payload.
pub trait Codec: Send + Sync {
    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Compress one raw block into a complete member.
    fn compress_block(&self, raw: &[u8], extra: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress one complete member.
    fn decompress_block(&self, member: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Wrap `source` in a reader that decodes the whole stream, however many
    /// members it holds. Used by the single-threaded fallback.
    fn stream_decoder<'a>(&self, source: Box<dyn Read + 'a>) -> Box<dyn Read + 'a>;
}
