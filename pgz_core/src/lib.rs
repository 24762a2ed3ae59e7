pub mod archiver;
pub mod block;
pub mod codec;
pub mod config;
pub mod engine;
pub mod fault;
pub mod format;
pub mod queue;
pub mod supplier;

pub use archiver::{ArchiveReport, Archiver, DecodePath, Operation};
pub use block::DataBlock;
pub use codec::Codec;
pub use config::{ArchiverConfig, Framing};
pub use engine::{CancelHandle, TransformEngine, TransformStats};
pub use fault::{Fault, FaultKind, Stage};
pub use queue::{Dequeue, ReorderQueue};
pub use supplier::{BlockSupplier, FramedBlockSupplier, RawBlockSupplier};
