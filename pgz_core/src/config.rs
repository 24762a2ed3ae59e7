use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::format::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};

/// Default bound on resident entries per reordering queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 6;

/// Default read size of the magic-scan framing.
pub const DEFAULT_SCAN_WINDOW: usize = 64 * 1024;

/// Default bounded-wait interval after which every stage re-checks the abort
/// flag.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// How member boundaries are found when decompressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Read each member's length from its `PG` header subfield.
    #[default]
    LengthPrefixed,
    /// Cut at every `1f 8b 08` signature. Heuristic; see
    /// [`FramedBlockSupplier`](crate::supplier::FramedBlockSupplier).
    MagicScan,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::LengthPrefixed => f.write_str("length-prefixed"),
            Framing::MagicScan => f.write_str("magic-scan"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "length" | "length-prefixed" => Ok(Framing::LengthPrefixed),
            "scan" | "magic-scan" => Ok(Framing::MagicScan),
            other => Err(format!(
                "unknown framing '{other}'. Valid options: length, scan"
            )),
        }
    }
}

/// Tuning knobs for one [`Archiver`](crate::Archiver).
///
/// Missing fields take their defaults when deserialized, so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Raw bytes per compressed member (the last one may be smaller).
    pub block_size: usize,
    /// Worker threads running the codec.
    pub workers: usize,
    /// Resident entries allowed in each reordering queue.
    pub queue_capacity: usize,
    pub framing: Framing,
    /// Bytes read per step by the magic-scan framing.
    pub scan_window: usize,
    pub poll_interval_ms: u64,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            framing: Framing::default(),
            scan_window: DEFAULT_SCAN_WINDOW,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ArchiverConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            anyhow::bail!(
                "block size {} out of range (1..={} bytes)",
                self.block_size,
                MAX_BLOCK_SIZE
            );
        }
        if self.workers == 0 {
            anyhow::bail!("at least one worker is required");
        }
        if self.queue_capacity < 2 {
            anyhow::bail!(
                "queue capacity {} too small; the reordering queue needs at least 2 slots",
                self.queue_capacity
            );
        }
        if self.scan_window < 3 {
            anyhow::bail!("scan window {} smaller than a member signature", self.scan_window);
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll interval must be at least 1 ms");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
