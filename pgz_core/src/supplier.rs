use std::io::{self, Read};

use parking_lot::Mutex;
use tracing::debug;

use crate::block::DataBlock;
use crate::config::Framing;
use crate::fault::{Fault, Stage};
use crate::format::{
    find_member_magic, MemberHeader, MAX_MEMBER_LEN, MEMBER_HEADER_SIZE, MEMBER_MAGIC,
};

/// Source of the blocks fed into the pipeline.
///
/// `next_block` never returns "nothing": exhaustion is reported exactly once
/// as a zero-length block carrying the next unused id, so downstream stages
/// see the end of the stream the same way they see data.
pub trait BlockSupplier: Send + Sync {
    fn next_block(&self) -> Result<DataBlock, Fault>;
}

/// Read until `buf` is full or the reader is exhausted.
///
/// `Read::read` may return short counts mid-stream; this keeps going so that
/// only the final block of a stream is ever shorter than requested.
pub fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Shared bookkeeping for both suppliers: the stream cursor and whether the
/// sentinel has already been handed out.
struct Cursor {
    next_id: u64,
    exhausted: bool,
}

impl Cursor {
    fn new() -> Self {
        Self {
            next_id: 0,
            exhausted: false,
        }
    }

    fn ensure_live(&self) -> Result<(), Fault> {
        if self.exhausted {
            return Err(Fault::resource(
                Stage::Supplier,
                "supplier polled after end of stream",
            ));
        }
        Ok(())
    }

    fn emit(&mut self, payload: Vec<u8>) -> DataBlock {
        let id = self.next_id;
        self.next_id += 1;
        if payload.is_empty() {
            self.exhausted = true;
            debug!(id, "supplier reached end of stream");
            DataBlock::sentinel(id)
        } else {
            debug!(id, len = payload.len(), "supplied block");
            DataBlock::new(id, payload)
        }
    }
}

// ── Raw input ───────────────────────────────────────────────────────────────

/// Slices uncompressed input into fixed-size blocks for compression.
pub struct RawBlockSupplier<R> {
    block_size: usize,
    inner: Mutex<RawState<R>>,
}

struct RawState<R> {
    source: R,
    cursor: Cursor,
}

impl<R: Read + Send> RawBlockSupplier<R> {
    pub fn new(source: R, block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            inner: Mutex::new(RawState {
                source,
                cursor: Cursor::new(),
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl<R: Read + Send> BlockSupplier for RawBlockSupplier<R> {
    fn next_block(&self) -> Result<DataBlock, Fault> {
        let mut state = self.inner.lock();
        state.cursor.ensure_live()?;
        let mut buf = vec![0u8; self.block_size];
        let n = read_up_to(&mut state.source, &mut buf).map_err(|e| Fault::io(Stage::Supplier, e))?;
        buf.truncate(n);
        Ok(state.cursor.emit(buf))
    }
}

// ── Container input ─────────────────────────────────────────────────────────

/// Splits a container stream into its members without invoking the codec.
///
/// Two framings are available:
///
/// - [`Framing::LengthPrefixed`] reads the fixed 20-byte member header,
///   takes the member length from the `PG` extra subfield and reads exactly
///   that many bytes. One header parse per member, no scanning.
/// - [`Framing::MagicScan`] looks for the `1f 8b 08` signature that opens the
///   next member and cuts there. It needs nothing from the writer beyond
///   back-to-back members, but compressed data can contain the signature by
///   chance and a member then gets split in the wrong place. The resulting
///   halves fail to decode, which the Archiver treats as a reason to fall
///   back to single-threaded decompression. A member that grows past
///   [`MAX_MEMBER_LEN`] without a boundary is a format fault, so an ordinary
///   single-member gzip file is never buffered whole.
pub struct FramedBlockSupplier<R> {
    framing: Framing,
    scan_window: usize,
    inner: Mutex<FramedState<R>>,
}

struct FramedState<R> {
    source: R,
    cursor: Cursor,
    /// Stream offset of the next member, for error messages.
    offset: u64,
    /// Magic-scan only: bytes read but not yet handed out.
    carry: Vec<u8>,
    /// Magic-scan only: where the next signature search starts in `carry`.
    scan_from: usize,
    eof: bool,
}

impl<R: Read + Send> FramedBlockSupplier<R> {
    pub fn new(source: R, framing: Framing, scan_window: usize) -> Self {
        Self {
            framing,
            scan_window: scan_window.max(MEMBER_MAGIC.len()),
            inner: Mutex::new(FramedState {
                source,
                cursor: Cursor::new(),
                offset: 0,
                carry: Vec::new(),
                scan_from: 0,
                eof: false,
            }),
        }
    }

    fn next_length_prefixed(state: &mut FramedState<R>) -> Result<Vec<u8>, Fault> {
        let mut header = [0u8; MEMBER_HEADER_SIZE];
        let n = read_up_to(&mut state.source, &mut header).map_err(|e| Fault::io(Stage::Supplier, e))?;
        if n == 0 {
            return Ok(Vec::new());
        }
        if n < MEMBER_HEADER_SIZE {
            return Err(Fault::format(
                Stage::Supplier,
                format!(
                    "truncated member header at offset {}: {n} of {MEMBER_HEADER_SIZE} bytes",
                    state.offset
                ),
            ));
        }
        let parsed = MemberHeader::from_bytes(&header).map_err(|e| {
            Fault::format(Stage::Supplier, format!("member at offset {}: {e}", state.offset))
        })?;

        let len = parsed.member_len as usize;
        let mut member = vec![0u8; len];
        member[..MEMBER_HEADER_SIZE].copy_from_slice(&header);
        let body = read_up_to(&mut state.source, &mut member[MEMBER_HEADER_SIZE..])
            .map_err(|e| Fault::io(Stage::Supplier, e))?;
        if body < len - MEMBER_HEADER_SIZE {
            return Err(Fault::format(
                Stage::Supplier,
                format!(
                    "truncated member at offset {}: expected {len} bytes, found {}",
                    state.offset,
                    MEMBER_HEADER_SIZE + body
                ),
            ));
        }
        state.offset += len as u64;
        Ok(member)
    }

    fn next_scanned(state: &mut FramedState<R>, window: usize) -> Result<Vec<u8>, Fault> {
        let magic_len = MEMBER_MAGIC.len();
        loop {
            if state.carry.len() >= magic_len && !state.carry.starts_with(&MEMBER_MAGIC) {
                return Err(Fault::format(
                    Stage::Supplier,
                    format!("no member signature at offset {}", state.offset),
                ));
            }

            let from = state.scan_from.max(magic_len);
            if let Some(at) = find_member_magic(&state.carry, from) {
                let member: Vec<u8> = state.carry.drain(..at).collect();
                state.scan_from = 0;
                state.offset += member.len() as u64;
                return Ok(member);
            }
            // A signature may straddle the end of what has been read so far;
            // keep the last two bytes in the next search.
            state.scan_from = state.carry.len().saturating_sub(magic_len - 1);

            if state.carry.len() > MAX_MEMBER_LEN {
                return Err(Fault::format(
                    Stage::Supplier,
                    format!(
                        "no member boundary within {MAX_MEMBER_LEN} bytes of offset {}",
                        state.offset
                    ),
                ));
            }

            if state.eof {
                if state.carry.is_empty() {
                    return Ok(Vec::new());
                }
                if state.carry.len() < magic_len {
                    return Err(Fault::format(
                        Stage::Supplier,
                        format!(
                            "{} trailing bytes at offset {} do not form a member",
                            state.carry.len(),
                            state.offset
                        ),
                    ));
                }
                let member = std::mem::take(&mut state.carry);
                state.scan_from = 0;
                state.offset += member.len() as u64;
                return Ok(member);
            }

            let start = state.carry.len();
            state.carry.resize(start + window, 0);
            let n = read_up_to(&mut state.source, &mut state.carry[start..])
                .map_err(|e| Fault::io(Stage::Supplier, e))?;
            state.carry.truncate(start + n);
            if n < window {
                state.eof = true;
            }
        }
    }
}

impl<R: Read + Send> BlockSupplier for FramedBlockSupplier<R> {
    fn next_block(&self) -> Result<DataBlock, Fault> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.cursor.ensure_live()?;
        let member = match self.framing {
            Framing::LengthPrefixed => Self::next_length_prefixed(state)?,
            Framing::MagicScan => Self::next_scanned(state, self.scan_window)?,
        };
        Ok(state.cursor.emit(member))
    }
}
