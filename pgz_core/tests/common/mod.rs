#![allow(dead_code)]

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::Duration;

/// Generate `len` deterministic bytes using a simple LCG.
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
pub fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

/// Half text, half noise, so both deflate paths get exercised.
pub fn mixed_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = compressible_bytes(len / 2);
    data.extend(pseudo_random_bytes(len - len / 2, seed));
    data
}

/// Deterministic per-block delay in milliseconds, up to `max_ms`.
pub fn jitter_ms(id: u64, max_ms: u64) -> u64 {
    let mixed = id
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    (mixed >> 56) % (max_ms + 1)
}

/// Hands out at most `step` bytes per `read` call.
pub struct Trickle<R> {
    pub inner: R,
    pub step: usize,
}

impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.step);
        self.inner.read(&mut buf[..n])
    }
}

/// Sleeps `delay` before every read and hands out at most `step` bytes.
/// Counts seeks to an absolute position, which is how a rewind shows up.
pub struct Sluggish<R> {
    pub inner: R,
    pub step: usize,
    pub delay: Duration,
    pub rewinds: usize,
}

impl<R> Sluggish<R> {
    pub fn new(inner: R, step: usize, delay: Duration) -> Self {
        Self {
            inner,
            step,
            delay,
            rewinds: 0,
        }
    }
}

impl<R: Read> Read for Sluggish<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.delay);
        let n = buf.len().min(self.step);
        self.inner.read(&mut buf[..n])
    }
}

impl<R: Seek> Seek for Sluggish<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if matches!(pos, SeekFrom::Start(_)) {
            self.rewinds += 1;
        }
        self.inner.seek(pos)
    }
}

/// Serves `limit` bytes from `inner`, then fails every read with a
/// non-data I/O error.
pub struct FailingReader<R> {
    pub inner: R,
    pub limit: u64,
    pub served: u64,
}

impl<R> FailingReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            served: 0,
        }
    }
}

impl<R: Read> Read for FailingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.limit.saturating_sub(self.served) as usize;
        if left == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"));
        }
        let n = buf.len().min(left);
        let n = self.inner.read(&mut buf[..n])?;
        self.served += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for FailingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Accepts `limit` bytes, then fails every write.
pub struct FailingWriter {
    pub written: Vec<u8>,
    pub limit: usize,
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written.len() >= self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = buf.len().min(self.limit - self.written.len());
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
