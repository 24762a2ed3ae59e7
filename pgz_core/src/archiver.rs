use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::block::DataBlock;
use crate::codec::Codec;
use crate::config::{ArchiverConfig, Framing};
use crate::engine::{CancelHandle, TransformEngine, TransformStats};
use crate::fault::{Fault, FaultKind, Stage};
use crate::format::{length_subfield, MemberHeader};
use crate::supplier::{FramedBlockSupplier, RawBlockSupplier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Compress,
    Decompress,
}

/// Which route produced the output of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodePath {
    /// The block-parallel pipeline.
    Parallel,
    /// The single-threaded whole-stream decoder.
    Fallback,
}

/// Summary of one successful compress or decompress call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub operation: Operation,
    pub path: DecodePath,
    pub codec: &'static str,
    /// Framing used to split the input; `None` when compressing.
    pub framing: Option<Framing>,
    pub block_size: usize,
    pub workers: usize,
    /// Blocks that went through the pipeline; 0 on the fallback path.
    pub blocks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub peak_input_queue: usize,
    pub peak_output_queue: usize,
    /// Kind of the parallel-path fault that sent the run to the fallback.
    pub recovered_from: Option<FaultKind>,
}

/// gzip-compatible archiver on top of the [`TransformEngine`].
///
/// Compression writes one independent gzip member per `block_size` bytes of
/// input, each carrying its own length in a `PG` extra subfield, so any gzip
/// reader can decode the result while this tool can split it back into
/// members without decoding.
///
/// Decompression runs the members in parallel. When the input cannot be
/// split or a member fails to decode (an ordinary gzip file, say), both
/// streams are rewound and the whole source is decoded on the calling
/// thread instead. I/O, resource and cancellation faults are never retried.
///
/// A failed run leaves whatever the destination already received.
pub struct Archiver {
    config: ArchiverConfig,
    codec: Arc<dyn Codec>,
    engine: TransformEngine,
}

impl Archiver {
    pub fn new(codec: Arc<dyn Codec>, config: ArchiverConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let engine = TransformEngine::from_config(&config);
        Ok(Self {
            config,
            codec,
            engine,
        })
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Handle that cancels whichever operation is running, from any thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.engine.cancel_handle()
    }

    pub fn cancel(&self) {
        self.engine.cancel();
    }

    /// Compress all of `source` into `destination` as concatenated members.
    pub fn compress<R, W>(&self, source: R, mut destination: W) -> Result<ArchiveReport, Fault>
    where
        R: Read + Send,
        W: Write + Send,
    {
        info!(
            codec = self.codec.name(),
            block_size = self.config.block_size,
            "compress started"
        );
        let supplier = RawBlockSupplier::new(source, self.config.block_size);
        let codec = self.codec.as_ref();
        let extra = length_subfield();

        let compress = |block: DataBlock| -> Result<Vec<u8>, Fault> {
            let id = block.id();
            let mut member = codec
                .compress_block(block.payload(), &extra)
                .map_err(|e| Fault::codec(Stage::Worker, Some(id), e))?;
            MemberHeader::stamp(&mut member)
                .map_err(|e| Fault::format(Stage::Worker, format!("block {id}: {e}")))?;
            Ok(member)
        };
        let write = |member: &[u8]| {
            destination
                .write_all(member)
                .map_err(|e| Fault::io(Stage::Consumer, e))
        };

        let stats = self.engine.transform(&supplier, compress, write)?;
        destination
            .flush()
            .map_err(|e| Fault::io(Stage::Consumer, e))?;

        Ok(self.parallel_report(Operation::Compress, None, stats))
    }

    /// Decompress `source` into `destination`, falling back to a
    /// single-threaded decode when the input is not this tool's container.
    pub fn decompress<R, W>(&self, mut source: R, mut destination: W) -> Result<ArchiveReport, Fault>
    where
        R: Read + Seek + Send,
        W: Write + Seek + Send,
    {
        let source_start = source
            .stream_position()
            .map_err(|e| Fault::io(Stage::Supplier, e))?;
        let destination_start = destination
            .stream_position()
            .map_err(|e| Fault::io(Stage::Consumer, e))?;

        info!(
            codec = self.codec.name(),
            framing = %self.config.framing,
            "decompress started"
        );
        let fault = match self.decompress_parallel(&mut source, &mut destination) {
            Ok(report) => return Ok(report),
            Err(fault) => fault,
        };
        if !fault.allows_fallback() {
            return Err(fault);
        }

        warn!(
            kind = %fault.kind(),
            "parallel decompression failed, retrying single-threaded: {fault}"
        );
        source
            .seek(SeekFrom::Start(source_start))
            .map_err(|e| Fault::io(Stage::Fallback, e))?;
        destination
            .seek(SeekFrom::Start(destination_start))
            .map_err(|e| Fault::io(Stage::Fallback, e))?;

        self.decompress_fallback(&mut source, &mut destination, source_start, fault.kind())
    }

    fn decompress_parallel<R, W>(&self, source: &mut R, destination: &mut W) -> Result<ArchiveReport, Fault>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let supplier = FramedBlockSupplier::new(&mut *source, self.config.framing, self.config.scan_window);
        let codec = self.codec.as_ref();

        let decompress = |block: DataBlock| -> Result<Vec<u8>, Fault> {
            let id = block.id();
            codec
                .decompress_block(block.payload())
                .map_err(|e| Fault::codec(Stage::Worker, Some(id), e))
        };
        let write = |raw: &[u8]| {
            destination
                .write_all(raw)
                .map_err(|e| Fault::io(Stage::Consumer, e))
        };

        let stats = self.engine.transform(&supplier, decompress, write)?;
        destination
            .flush()
            .map_err(|e| Fault::io(Stage::Consumer, e))?;

        Ok(self.parallel_report(Operation::Decompress, Some(self.config.framing), stats))
    }

    fn decompress_fallback<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        source_start: u64,
        recovered_from: FaultKind,
    ) -> Result<ArchiveReport, Fault>
    where
        R: Read + Seek,
        W: Write,
    {
        let cancel = self.engine.cancel_handle();
        let mut buf = vec![0u8; self.config.block_size];
        let mut bytes_out = 0u64;

        {
            let mut decoder = self.codec.stream_decoder(Box::new(&mut *source));
            loop {
                if cancel.is_cancelled() {
                    return Err(Fault::Cancelled);
                }
                let n = match decoder.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Fault::from_decoder(Stage::Fallback, e)),
                };
                destination
                    .write_all(&buf[..n])
                    .map_err(|e| Fault::io(Stage::Fallback, e))?;
                bytes_out += n as u64;
            }
        }
        destination
            .flush()
            .map_err(|e| Fault::io(Stage::Fallback, e))?;

        let source_end = source
            .stream_position()
            .map_err(|e| Fault::io(Stage::Fallback, e))?;
        info!(bytes_out, "single-threaded fallback finished");

        Ok(ArchiveReport {
            operation: Operation::Decompress,
            path: DecodePath::Fallback,
            codec: self.codec.name(),
            framing: Some(self.config.framing),
            block_size: self.config.block_size,
            workers: 1,
            blocks: 0,
            bytes_in: source_end.saturating_sub(source_start),
            bytes_out,
            peak_input_queue: 0,
            peak_output_queue: 0,
            recovered_from: Some(recovered_from),
        })
    }

    fn parallel_report(
        &self,
        operation: Operation,
        framing: Option<Framing>,
        stats: TransformStats,
    ) -> ArchiveReport {
        ArchiveReport {
            operation,
            path: DecodePath::Parallel,
            codec: self.codec.name(),
            framing,
            block_size: self.config.block_size,
            workers: stats.workers,
            blocks: stats.blocks,
            bytes_in: stats.bytes_in,
            bytes_out: stats.bytes_out,
            peak_input_queue: stats.peak_input_queue,
            peak_output_queue: stats.peak_output_queue,
            recovered_from: None,
        }
    }
}
