use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Pipeline role a fault originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Supplier,
    Worker,
    Consumer,
    Fallback,
    Engine,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Supplier => "supplier",
            Stage::Worker => "worker",
            Stage::Consumer => "consumer",
            Stage::Fallback => "fallback",
            Stage::Engine => "engine",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`Fault`], used for the fallback decision and
/// for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    Io,
    Format,
    Codec,
    Cancelled,
    Resource,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Io => "I/O fault",
            FaultKind::Format => "format fault",
            FaultKind::Codec => "codec fault",
            FaultKind::Cancelled => "cancellation",
            FaultKind::Resource => "resource fault",
        };
        f.write_str(name)
    }
}

/// The first failure recorded by any stage of a transform run.
#[derive(Debug, Error)]
pub enum Fault {
    /// Reading the source or writing the destination failed.
    #[error("I/O failure in {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    /// The input is not a container this tool can split into members.
    #[error("unrecognized container in {stage}: {message}")]
    Format { stage: Stage, message: String },

    /// The block codec rejected a block or member.
    #[error("codec failure in {stage}{}: {source}", block_suffix(.block))]
    Codec {
        stage: Stage,
        block: Option<u64>,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation was cancelled by request")]
    Cancelled,

    /// A stage was lost (panicked) or the engine was misused.
    #[error("resource failure in {stage}: {message}")]
    Resource { stage: Stage, message: String },
}

fn block_suffix(block: &Option<u64>) -> String {
    match block {
        Some(id) => format!(" on block {id}"),
        None => String::new(),
    }
}

impl Fault {
    pub fn io(stage: Stage, source: io::Error) -> Self {
        Fault::Io { stage, source }
    }

    pub fn format(stage: Stage, message: impl Into<String>) -> Self {
        Fault::Format {
            stage,
            message: message.into(),
        }
    }

    pub fn codec(stage: Stage, block: Option<u64>, source: impl Into<anyhow::Error>) -> Self {
        Fault::Codec {
            stage,
            block,
            source: source.into(),
        }
    }

    pub fn resource(stage: Stage, message: impl Into<String>) -> Self {
        Fault::Resource {
            stage,
            message: message.into(),
        }
    }

    /// Classify an error coming out of a decoding reader: malformed or
    /// truncated compressed data is a codec fault, anything else is I/O.
    pub fn from_decoder(stage: Stage, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof => Fault::codec(stage, None, err),
            _ => Fault::io(stage, err),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::Io { .. } => FaultKind::Io,
            Fault::Format { .. } => FaultKind::Format,
            Fault::Codec { .. } => FaultKind::Codec,
            Fault::Cancelled => FaultKind::Cancelled,
            Fault::Resource { .. } => FaultKind::Resource,
        }
    }

    /// Stage the fault was raised in; `None` for cancellation.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Fault::Io { stage, .. }
            | Fault::Format { stage, .. }
            | Fault::Codec { stage, .. }
            | Fault::Resource { stage, .. } => Some(*stage),
            Fault::Cancelled => None,
        }
    }

    /// Whether a failed parallel decompression may be retried on the
    /// single-threaded path. Only input-shape problems qualify.
    pub fn allows_fallback(&self) -> bool {
        matches!(self.kind(), FaultKind::Format | FaultKind::Codec)
    }
}
