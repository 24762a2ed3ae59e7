use std::io::{Read, Write};

use flate2::bufread::GzDecoder;
use flate2::read::MultiGzDecoder;
use flate2::{Compression, GzBuilder};

use pgz_core::codec::Codec;
use pgz_core::format::{MAX_BLOCK_SIZE, MEMBER_TRAILER_SIZE};

/// zlib's default trade-off between speed and ratio.
pub const DEFAULT_LEVEL: u32 = 6;

/// gzip member codec backed by `flate2`.
///
/// Every block becomes one complete gzip member with its own header, CRC32
/// and ISIZE, so any member can be decoded on its own and the concatenation
/// is still a valid multi-member gzip file.
pub struct GzipCodec {
    /// DEFLATE level (0 = stored, 9 = smallest).
    pub level: u32,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
        }
    }
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress_block(&self, raw: &[u8], extra: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut builder = GzBuilder::new();
        if !extra.is_empty() {
            builder = builder.extra(extra.to_vec());
        }
        let mut encoder = builder.write(
            Vec::with_capacity(raw.len() / 2 + 64),
            Compression::new(self.level),
        );
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, member: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(isize_hint(member));
        let mut rest = member;
        GzDecoder::new(&mut rest)
            .read_to_end(&mut raw)
            .map_err(|e| anyhow::anyhow!("gzip member decode error: {}", e))?;
        // The decoder stops at the first trailer; anything after it was cut
        // from the stream as part of this member and would be lost.
        if !rest.is_empty() {
            anyhow::bail!("{} bytes follow the end of the gzip member", rest.len());
        }
        Ok(raw)
    }

    fn stream_decoder<'a>(&self, source: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        Box::new(MultiGzDecoder::new(source))
    }
}

/// Uncompressed size recorded in the member trailer, used only to size the
/// output buffer. ISIZE is mod 2^32 and untrusted, so it is capped.
fn isize_hint(member: &[u8]) -> usize {
    if member.len() < MEMBER_TRAILER_SIZE {
        return 0;
    }
    let tail = &member[member.len() - 4..];
    let isize = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
    isize.min(MAX_BLOCK_SIZE)
}
