use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::block::DataBlock;
use crate::config::ArchiverConfig;
use crate::fault::{Fault, Stage};
use crate::queue::{Dequeue, ReorderQueue};
use crate::supplier::BlockSupplier;

/// Cloneable cancellation switch for a [`TransformEngine`].
///
/// Cancelling is cooperative: every stage checks the flag whenever one of its
/// bounded waits expires, so a run unwinds within roughly one poll interval
/// plus the time of the codec call in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Counters for one successful [`TransformEngine::transform`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    /// Data blocks produced by the supplier (the sentinel excluded).
    pub blocks: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub workers: usize,
    /// Most entries resident in the supplier → worker queue at once.
    pub peak_input_queue: usize,
    /// Most entries resident in the worker → consumer queue at once.
    pub peak_output_queue: usize,
}

/// Order-preserving parallel byte-block transformer.
///
/// One supplier thread reads blocks, `workers` threads transform them in
/// whatever order they finish, and one consumer thread receives the results
/// in the supplier's order. Two [`ReorderQueue`]s connect the stages and
/// bound memory to `queue_capacity` blocks each.
#[derive(Debug)]
pub struct TransformEngine {
    workers: usize,
    queue_capacity: usize,
    poll_interval: Duration,
    cancel: CancelHandle,
    running: AtomicBool,
}

impl TransformEngine {
    pub fn new(workers: usize, queue_capacity: usize, poll_interval: Duration) -> Self {
        Self {
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(2),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            cancel: CancelHandle::default(),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ArchiverConfig) -> Self {
        Self::new(config.workers, config.queue_capacity, config.poll_interval())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Ask a running transform to stop. It returns [`Fault::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `supplier` → `transform` → `consume` to completion.
    ///
    /// `consume` sees the transformed payloads in exactly the order the
    /// supplier produced the blocks. Succeeds only if no stage recorded a
    /// fault; otherwise returns the first fault recorded. If `transform`
    /// fails on block k, `consume` has received some contiguous prefix of
    /// blocks 0..k and nothing after it. All threads are joined before
    /// this returns.
    ///
    /// The engine runs one transform at a time; a concurrent call fails with
    /// a resource fault. The cancel flag is cleared on entry.
    pub fn transform<S, F, C>(
        &self,
        supplier: &S,
        transform: F,
        consume: C,
    ) -> Result<TransformStats, Fault>
    where
        S: BlockSupplier + ?Sized,
        F: Fn(DataBlock) -> Result<Vec<u8>, Fault> + Sync,
        C: FnMut(&[u8]) -> Result<(), Fault> + Send,
    {
        let _running = RunGuard::acquire(&self.running)?;
        self.cancel.reset();

        let ctx = RunContext::new(&self.cancel, self.poll_interval);
        let inbound: ReorderQueue<Vec<u8>> = ReorderQueue::new(self.queue_capacity);
        let outbound: ReorderQueue<Option<Vec<u8>>> = ReorderQueue::new(self.queue_capacity);

        info!(
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            "transform started"
        );

        let (supplied, bytes_out) = thread::scope(|scope| {
            let ctx = &ctx;
            let inbound = &inbound;
            let outbound = &outbound;
            let transform = &transform;

            let supply = spawn_stage(scope, ctx, "pgz-supplier", Stage::Supplier, move || {
                supply_loop(ctx, supplier, inbound)
            });
            for worker in 0..self.workers {
                spawn_stage(scope, ctx, &format!("pgz-worker-{worker}"), Stage::Worker, move || {
                    work_loop(ctx, worker, inbound, outbound, transform)
                });
            }
            let consumer = spawn_stage(scope, ctx, "pgz-consumer", Stage::Consumer, move || {
                consume_loop(ctx, outbound, consume)
            });

            let supplied = supply.map(join_stage).unwrap_or_default();
            let bytes_out = consumer.map(join_stage).unwrap_or_default();
            (supplied, bytes_out)
        });

        let stats = TransformStats {
            blocks: supplied.blocks,
            bytes_in: supplied.bytes,
            bytes_out,
            workers: self.workers,
            peak_input_queue: inbound.high_water_mark(),
            peak_output_queue: outbound.high_water_mark(),
        };

        match ctx.into_fault() {
            Some(fault) => {
                info!(kind = %fault.kind(), "transform failed: {fault}");
                Err(fault)
            }
            None => {
                info!(
                    blocks = stats.blocks,
                    bytes_in = stats.bytes_in,
                    bytes_out = stats.bytes_out,
                    "transform finished"
                );
                Ok(stats)
            }
        }
    }
}

/// Marks the engine busy for the duration of one run.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, Fault> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(Fault::resource(
                Stage::Engine,
                "transform already running on this engine",
            ));
        }
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fault and abort state shared by the stages of a single run.
struct RunContext<'e> {
    cancel: &'e CancelHandle,
    poll: Duration,
    aborted: AtomicBool,
    fault: Mutex<Option<Fault>>,
}

impl<'e> RunContext<'e> {
    fn new(cancel: &'e CancelHandle, poll: Duration) -> Self {
        Self {
            cancel,
            poll,
            aborted: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    /// Record `fault` unless an earlier one is already recorded, then abort.
    fn fail(&self, fault: Fault) {
        {
            let mut slot = self.fault.lock();
            if slot.is_none() {
                debug!("recording fault: {fault}");
                *slot = Some(fault);
            } else {
                debug!("suppressing later fault: {fault}");
            }
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        if self.aborted.load(Ordering::Acquire) {
            return true;
        }
        if self.cancel.is_cancelled() {
            self.fail(Fault::Cancelled);
            return true;
        }
        false
    }

    /// Enqueue with bounded waits until accepted or the run is aborted.
    fn forward<T>(&self, queue: &ReorderQueue<T>, id: u64, item: T) -> bool {
        let mut item = item;
        loop {
            match queue.enqueue(id, item, self.poll) {
                Ok(()) => return true,
                Err(rejected) => {
                    if self.should_stop() {
                        return false;
                    }
                    item = rejected;
                }
            }
        }
    }

    fn guarded<T: Default>(&self, stage: Stage, body: impl FnOnce() -> T) -> T {
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(value) => value,
            Err(payload) => {
                self.fail(Fault::resource(
                    stage,
                    format!("{stage} thread panicked: {}", panic_message(payload.as_ref())),
                ));
                T::default()
            }
        }
    }

    fn into_fault(self) -> Option<Fault> {
        self.fault.into_inner()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn spawn_stage<'scope, 'env, T, B>(
    scope: &'scope Scope<'scope, 'env>,
    ctx: &'scope RunContext<'_>,
    name: &str,
    stage: Stage,
    body: B,
) -> Option<ScopedJoinHandle<'scope, T>>
where
    T: Default + Send + 'scope,
    B: FnOnce() -> T + Send + 'scope,
{
    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn_scoped(scope, move || ctx.guarded(stage, body));
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            ctx.fail(Fault::resource(
                Stage::Engine,
                format!("failed to spawn {name}: {e}"),
            ));
            None
        }
    }
}

fn join_stage<T: Default>(handle: ScopedJoinHandle<'_, T>) -> T {
    // Stage bodies run under `guarded`, so a join error cannot carry a fault
    // that was not already recorded.
    handle.join().unwrap_or_default()
}

#[derive(Debug, Default)]
struct SupplyTally {
    blocks: u64,
    bytes: u64,
}

fn supply_loop<S>(ctx: &RunContext<'_>, supplier: &S, inbound: &ReorderQueue<Vec<u8>>) -> SupplyTally
where
    S: BlockSupplier + ?Sized,
{
    let mut tally = SupplyTally::default();
    while !ctx.should_stop() {
        let block = match supplier.next_block() {
            Ok(block) => block,
            Err(fault) => {
                ctx.fail(fault);
                break;
            }
        };
        let id = block.id();
        let last = block.is_sentinel();
        if !last {
            tally.blocks += 1;
            tally.bytes += block.payload_len() as u64;
        }
        if !ctx.forward(inbound, id, block.into_payload()) || last {
            break;
        }
    }
    debug!(blocks = tally.blocks, "supplier exiting");
    tally
}

fn work_loop<F>(
    ctx: &RunContext<'_>,
    worker: usize,
    inbound: &ReorderQueue<Vec<u8>>,
    outbound: &ReorderQueue<Option<Vec<u8>>>,
    transform: &F,
) where
    F: Fn(DataBlock) -> Result<Vec<u8>, Fault>,
{
    while !ctx.should_stop() {
        match inbound.dequeue(ctx.poll) {
            Dequeue::TimedOut => continue,
            Dequeue::Closed => break,
            Dequeue::Ready(id, payload) if payload.is_empty() => {
                // The sentinel is the last id, so nothing else will arrive:
                // release the other workers and pass the end downstream.
                inbound.close();
                ctx.forward(outbound, id, None);
                break;
            }
            Dequeue::Ready(id, payload) => match transform(DataBlock::new(id, payload)) {
                Ok(out) => {
                    debug!(worker, id, len = out.len(), "block transformed");
                    if !ctx.forward(outbound, id, Some(out)) {
                        break;
                    }
                }
                Err(fault) => {
                    debug!(worker, id, "block transform failed");
                    ctx.fail(fault);
                    break;
                }
            },
        }
    }
    debug!(worker, "worker exiting");
}

fn consume_loop<C>(ctx: &RunContext<'_>, outbound: &ReorderQueue<Option<Vec<u8>>>, mut consume: C) -> u64
where
    C: FnMut(&[u8]) -> Result<(), Fault>,
{
    let mut written = 0u64;
    while !ctx.should_stop() {
        match outbound.dequeue(ctx.poll) {
            Dequeue::TimedOut => continue,
            Dequeue::Closed | Dequeue::Ready(_, None) => break,
            Dequeue::Ready(id, Some(payload)) => {
                if let Err(fault) = consume(&payload) {
                    ctx.fail(fault);
                    break;
                }
                written += payload.len() as u64;
                debug!(id, len = payload.len(), "block consumed");
            }
        }
    }
    debug!(bytes = written, "consumer exiting");
    written
}
