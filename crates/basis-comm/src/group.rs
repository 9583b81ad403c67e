//! Worker group runtime.
//!
//! A group is a fixed set of workers (one OS thread each) that only interact
//! through the collectives on [`Communicator`]. Every collective is blocking:
//! a worker waits until all workers have entered the matching call. Calls are
//! tagged with an operation name, a caller label and a per-worker sequence
//! number, and a mismatch on any worker fails the collective on all of them.
//!
//! When one worker returns an error (or panics) the group is aborted: workers
//! already waiting, and workers reaching their next collective, return a
//! `group-aborted` protocol error instead of deadlocking.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use basis_core::errors::{BasisError, ErrorInfo};
use tracing::{debug, trace, warn};

use crate::stage::Stage;

type Payload = Box<dyn Any + Send>;

fn poisoned() -> BasisError {
    BasisError::protocol("lock-poisoned", "a worker panicked while holding group state")
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BasisError> {
    mutex.lock().map_err(|_| poisoned())
}

#[derive(Debug, Clone)]
struct Abort {
    rank: usize,
    error: BasisError,
}

impl Abort {
    fn to_error(&self, observer: usize) -> BasisError {
        BasisError::Protocol(
            ErrorInfo::new("group-aborted", "another worker aborted the group")
                .with_context("origin_rank", self.rank)
                .with_context("observer_rank", observer)
                .with_context("origin_code", &self.error.info().code),
        )
    }
}

#[derive(Debug, Default)]
struct RendezvousState {
    arrived: usize,
    generation: u64,
    abort: Option<Abort>,
}

/// Generation-counting barrier that can be broken by an abort.
#[derive(Debug)]
struct Rendezvous {
    size: usize,
    state: Mutex<RendezvousState>,
    wake: Condvar,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(RendezvousState::default()),
            wake: Condvar::new(),
        }
    }

    fn wait(&self, rank: usize) -> Result<(), BasisError> {
        let mut state = lock(&self.state)?;
        if let Some(abort) = &state.abort {
            return Err(abort.to_error(rank));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.wake.notify_all();
            return Ok(());
        }
        while state.generation == generation && state.abort.is_none() {
            state = self.wake.wait(state).map_err(|_| poisoned())?;
        }
        if state.generation != generation {
            return Ok(());
        }
        match &state.abort {
            Some(abort) => Err(abort.to_error(rank)),
            None => Ok(()),
        }
    }

    fn abort(&self, abort: Abort) {
        // Poisoning only happens after a panic, which is already being reported.
        if let Ok(mut state) = self.state.lock() {
            if state.abort.is_none() {
                state.abort = Some(abort);
            }
            self.wake.notify_all();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CollectiveTag {
    sequence: u64,
    op: &'static str,
    label: String,
}

impl std::fmt::Display for CollectiveTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}({})", self.sequence, self.op, self.label)
    }
}

struct Shared {
    size: usize,
    rendezvous: Rendezvous,
    /// `slots[src * size + dst]` holds the payload from `src` to `dst`.
    slots: Mutex<Vec<Option<Payload>>>,
    tags: Mutex<Vec<Option<CollectiveTag>>>,
}

impl Shared {
    fn new(size: usize) -> Self {
        Self {
            size,
            rendezvous: Rendezvous::new(size),
            slots: Mutex::new((0..size * size).map(|_| None).collect()),
            tags: Mutex::new(vec![None; size]),
        }
    }
}

/// Handle through which a worker takes part in group collectives.
pub struct Communicator {
    rank: usize,
    shared: Arc<Shared>,
    sequence: Cell<u64>,
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .field("sequence", &self.sequence.get())
            .finish()
    }
}

impl Communicator {
    fn new(rank: usize, shared: Arc<Shared>) -> Self {
        Self {
            rank,
            shared,
            sequence: Cell::new(0),
        }
    }

    /// Index of this worker within the group.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of workers in the group.
    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Returns true on the worker that collects gathered results.
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Number of collectives this worker has entered so far.
    pub fn collectives_entered(&self) -> u64 {
        self.sequence.get()
    }

    /// Aborts the group, waking every worker blocked in a collective.
    pub fn abort(&self, error: BasisError) {
        warn!(rank = self.rank, %error, "aborting worker group");
        self.shared.rendezvous.abort(Abort {
            rank: self.rank,
            error,
        });
    }

    /// Blocks until every worker reaches the matching barrier.
    pub fn barrier(&self, label: &str) -> Result<(), BasisError> {
        let outgoing = (0..self.size()).map(|_| Box::new(()) as Payload).collect();
        self.exchange("barrier", label, outgoing).map(|_| ())
    }

    /// Stage-tagged barrier: fails on every worker unless all of them announce
    /// the same stage.
    pub fn await_all(&self, stage: Stage) -> Result<(), BasisError> {
        debug!(rank = self.rank, stage = stage.name(), "awaiting all workers");
        let outgoing = (0..self.size()).map(|_| Box::new(()) as Payload).collect();
        self.exchange("await-all", stage.name(), outgoing)
            .map(|_| ())
    }

    /// Personalised all-to-all: `outgoing[dst]` is delivered to worker `dst`,
    /// the result holds one vector per source worker in rank order.
    pub fn all_to_all<T: Send + 'static>(
        &self,
        label: &str,
        outgoing: Vec<Vec<T>>,
    ) -> Result<Vec<Vec<T>>, BasisError> {
        if outgoing.len() != self.size() {
            let err = BasisError::Protocol(
                ErrorInfo::new("all-to-all-arity", "one outgoing buffer per worker is required")
                    .with_context("label", label)
                    .with_context("buffers", outgoing.len())
                    .with_context("workers", self.size()),
            );
            self.abort(err.clone());
            return Err(err);
        }
        let payloads = outgoing
            .into_iter()
            .map(|buffer| Box::new(buffer) as Payload)
            .collect();
        let incoming = self.exchange("all-to-all", label, payloads)?;
        incoming
            .into_iter()
            .enumerate()
            .map(|(src, payload)| {
                payload.downcast::<Vec<T>>().map(|buffer| *buffer).map_err(|_| {
                    BasisError::Protocol(
                        ErrorInfo::new("payload-type", "received payload of unexpected type")
                            .with_context("label", label)
                            .with_context("source_rank", src),
                    )
                })
            })
            .collect()
    }

    /// Every worker receives every worker's value, in rank order.
    pub fn all_gather<T: Clone + Send + 'static>(
        &self,
        label: &str,
        value: T,
    ) -> Result<Vec<T>, BasisError> {
        let outgoing = (0..self.size()).map(|_| vec![value.clone()]).collect();
        let incoming = self.all_to_all(label, outgoing)?;
        incoming
            .into_iter()
            .map(|mut buffer| {
                buffer
                    .pop()
                    .ok_or_else(|| BasisError::protocol("gather-empty", "missing gathered value"))
            })
            .collect()
    }

    /// Element-wise sum across workers. Partial sums are added in rank order so
    /// every worker obtains bit-identical results.
    pub fn all_reduce_sum(&self, label: &str, local: &[f64]) -> Result<Vec<f64>, BasisError> {
        let gathered = self.all_gather(label, local.to_vec())?;
        reduce_in_rank_order(label, local.len(), gathered, 0.0, |acc, value| *acc += value)
    }

    /// Integer counterpart of [`Communicator::all_reduce_sum`].
    pub fn all_reduce_sum_u64(&self, label: &str, local: &[u64]) -> Result<Vec<u64>, BasisError> {
        let gathered = self.all_gather(label, local.to_vec())?;
        reduce_in_rank_order(label, local.len(), gathered, 0u64, |acc, value| *acc += value)
    }

    /// Sends `value` to `root`; the root receives all values in rank order.
    pub fn gather<T: Send + 'static>(
        &self,
        label: &str,
        root: usize,
        value: T,
    ) -> Result<Option<Vec<T>>, BasisError> {
        let mut value = Some(value);
        let outgoing = (0..self.size())
            .map(|dst| {
                if dst == root {
                    value.take().into_iter().collect()
                } else {
                    Vec::new()
                }
            })
            .collect();
        let incoming = self.all_to_all(label, outgoing)?;
        if self.rank != root {
            return Ok(None);
        }
        incoming
            .into_iter()
            .map(|mut buffer| {
                buffer
                    .pop()
                    .ok_or_else(|| BasisError::protocol("gather-empty", "missing gathered value"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Distributes the root's value to every worker. Non-root workers pass `None`.
    pub fn broadcast<T: Clone + Send + 'static>(
        &self,
        label: &str,
        root: usize,
        value: Option<T>,
    ) -> Result<T, BasisError> {
        let outgoing = match (self.rank == root, value) {
            (true, Some(value)) => (0..self.size()).map(|_| vec![value.clone()]).collect(),
            (true, None) => {
                let err = BasisError::protocol("broadcast-empty", "root has nothing to broadcast");
                self.abort(err.clone());
                return Err(err);
            }
            (false, _) => (0..self.size()).map(|_| Vec::new()).collect(),
        };
        let mut incoming = self.all_to_all(label, outgoing)?;
        incoming
            .get_mut(root)
            .and_then(|buffer| buffer.pop())
            .ok_or_else(|| BasisError::protocol("broadcast-empty", "missing broadcast value"))
    }

    fn next_tag(&self, op: &'static str, label: &str) -> CollectiveTag {
        let sequence = self.sequence.get();
        self.sequence.set(sequence + 1);
        CollectiveTag {
            sequence,
            op,
            label: label.to_string(),
        }
    }

    fn exchange(
        &self,
        op: &'static str,
        label: &str,
        outgoing: Vec<Payload>,
    ) -> Result<Vec<Payload>, BasisError> {
        let size = self.size();
        let tag = self.next_tag(op, label);
        trace!(rank = self.rank, %tag, "entering collective");
        {
            let mut slots = lock(&self.shared.slots)?;
            for (dst, payload) in outgoing.into_iter().enumerate() {
                slots[self.rank * size + dst] = Some(payload);
            }
            lock(&self.shared.tags)?[self.rank] = Some(tag.clone());
        }

        self.shared.rendezvous.wait(self.rank)?;

        let mismatch = lock(&self.shared.tags)?
            .iter()
            .enumerate()
            .find(|(_, other)| other.as_ref() != Some(&tag))
            .map(|(rank, other)| (rank, other.clone()));
        if let Some((other_rank, other)) = mismatch {
            let err = BasisError::Protocol(
                ErrorInfo::new("collective-mismatch", "workers entered different collectives")
                    .with_context("rank", self.rank)
                    .with_context("expected", &tag)
                    .with_context("other_rank", other_rank)
                    .with_context(
                        "other",
                        other.map(|t| t.to_string()).unwrap_or_else(|| "none".into()),
                    ),
            );
            self.abort(err.clone());
            return Err(err);
        }

        let incoming = {
            let mut slots = lock(&self.shared.slots)?;
            (0..size)
                .map(|src| {
                    slots[src * size + self.rank].take().ok_or_else(|| {
                        BasisError::Protocol(
                            ErrorInfo::new("missing-payload", "no payload from source worker")
                                .with_context("tag", &tag)
                                .with_context("source_rank", src),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        // Second rendezvous: nobody may overwrite slots or tags before every
        // worker has drained its column.
        self.shared.rendezvous.wait(self.rank)?;
        Ok(incoming)
    }
}

fn reduce_in_rank_order<T: Copy>(
    label: &str,
    len: usize,
    gathered: Vec<Vec<T>>,
    zero: T,
    add: impl Fn(&mut T, T),
) -> Result<Vec<T>, BasisError> {
    let mut total = vec![zero; len];
    for (src, partial) in gathered.into_iter().enumerate() {
        if partial.len() != len {
            return Err(BasisError::Protocol(
                ErrorInfo::new("reduce-length", "workers reduced buffers of different length")
                    .with_context("label", label)
                    .with_context("source_rank", src)
                    .with_context("expected", len)
                    .with_context("received", partial.len()),
            ));
        }
        for (acc, value) in total.iter_mut().zip(partial) {
            add(acc, value);
        }
    }
    Ok(total)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Runs `job` on `workers` cooperating workers and returns their results in
/// rank order.
///
/// If any worker fails, the error it raised is returned (rather than the
/// `group-aborted` errors observed by its peers).
pub fn launch<T, F>(workers: usize, job: F) -> Result<Vec<T>, BasisError>
where
    T: Send,
    F: Fn(&Communicator) -> Result<T, BasisError> + Sync,
{
    if workers == 0 {
        return Err(BasisError::configuration(
            "invalid-workers",
            "a worker group needs at least one worker",
        ));
    }
    let shared = Arc::new(Shared::new(workers));
    debug!(workers, "launching worker group");

    let outcomes: Vec<Result<T, BasisError>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for rank in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let job = &job;
            let spawned = thread::Builder::new()
                .name(format!("basis-worker-{rank}"))
                .spawn_scoped(scope, move || {
                    let comm = Communicator::new(rank, worker_shared);
                    let span = tracing::info_span!("worker", rank);
                    let _entered = span.enter();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| job(&comm)))
                        .unwrap_or_else(|payload| {
                            Err(BasisError::Protocol(
                                ErrorInfo::new("worker-panic", panic_message(payload.as_ref()))
                                    .with_context("rank", rank),
                            ))
                        });
                    if let Err(err) = &result {
                        if !err.is_group_abort() {
                            comm.abort(err.clone());
                        }
                    }
                    result
                });
            match spawned {
                Ok(handle) => handles.push(Ok(handle)),
                Err(err) => {
                    let err = BasisError::ResourceExhaustion(
                        ErrorInfo::new("worker-spawn", err.to_string()).with_context("rank", rank),
                    );
                    shared.rendezvous.abort(Abort {
                        rank,
                        error: err.clone(),
                    });
                    handles.push(Err(err));
                }
            }
        }
        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    Err(BasisError::protocol("worker-join", "worker thread could not be joined"))
                }),
                Err(err) => Err(err),
            })
            .collect()
    });

    let mut results = Vec::with_capacity(workers);
    let mut first_abort = None;
    let mut origin = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => results.push(value),
            Err(err) if err.is_group_abort() => {
                first_abort.get_or_insert(err);
            }
            Err(err) => {
                origin.get_or_insert(err);
            }
        }
    }
    match origin.or(first_abort) {
        Some(err) => Err(err),
        None => Ok(results),
    }
}
