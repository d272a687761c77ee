//! SPMD communicator abstraction.
//!
//! The random field engine is single-program-multiple-data: every rank runs
//! the same call sequence and coordinates exclusively through the
//! [`Communicator`]. Collectives are synchronous, point-to-point sends are
//! buffered (they never block) and receives block until the matching message
//! arrives, so the usual "post all sends, then receive" rounds cannot
//! deadlock.
//!
//! Two implementations are provided: [`SelfComm`] for single-rank runs and
//! [`LocalComm`], which executes a fixed-size rank group on threads of the
//! current process. [`LocalWorld::run`] is the entry point for multi-rank
//! execution and for the parallel test scenarios.
//!
//! Two concurrent operations over the same communicator must issue their
//! collectives in the same order on every rank; interleaving operations on
//! independent objects over one communicator is not supported.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Condvar, Mutex};

/// Tag reserved for the built-in `all_gather`; user tags must stay below it.
const GATHER_TAG: u32 = u32::MAX;

/// Communication surface used by every distributed component.
pub trait Communicator: Send + Sync {
    /// Rank of the calling process within this communicator.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Whether this communicator spans the full world of the run.
    ///
    /// Field generation refuses to run on sub-communicators unless the
    /// caller explicitly opts in, to guard against silently-inconsistent
    /// Monte Carlo samples.
    fn is_world(&self) -> bool;

    /// Global sum reduction, result available on every rank.
    fn all_reduce_sum(&self, value: f64) -> f64;

    /// Global minimum reduction.
    fn all_reduce_min(&self, value: f64) -> f64;

    /// Global maximum reduction.
    fn all_reduce_max(&self, value: f64) -> f64;

    /// Buffered send; returns immediately.
    fn send(&self, dest: usize, tag: u32, data: &[f64]);

    /// Blocking receive of the next message from `src` with `tag`.
    fn recv(&self, src: usize, tag: u32) -> Vec<f64>;

    /// Synchronize all ranks.
    fn barrier(&self);

    /// Global sum of per-rank counts.
    fn all_reduce_count(&self, value: usize) -> usize {
        self.all_reduce_sum(value as f64).round() as usize
    }

    /// Logical AND across ranks, used to reduce error flags before a
    /// collective that would otherwise deadlock.
    fn all_reduce_all(&self, value: bool) -> bool {
        let agreeing = self.all_reduce_sum(if value { 1.0 } else { 0.0 });
        agreeing.round() as usize == self.size()
    }

    /// Concatenation of every rank's buffer in rank order, on every rank.
    fn all_gather(&self, data: &[f64]) -> Vec<f64> {
        let size = self.size();
        let rank = self.rank();
        for dest in 0..size {
            if dest != rank {
                self.send(dest, GATHER_TAG, data);
            }
        }
        let mut result = Vec::with_capacity(size * data.len());
        for src in 0..size {
            if src == rank {
                result.extend_from_slice(data);
            } else {
                result.extend_from_slice(&self.recv(src, GATHER_TAG));
            }
        }
        self.barrier();
        result
    }
}

/// The trivial single-rank communicator.
///
/// Self-sends are buffered FIFO per tag so that the uniform exchange code
/// paths (ghost exchange with wrap-around neighbors, slab resorts) work
/// unchanged on one rank.
pub struct SelfComm {
    world: bool,
    queues: Mutex<HashMap<u32, VecDeque<Vec<f64>>>>,
}

impl SelfComm {
    pub fn new() -> Self {
        Self {
            world: true,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// A single-rank communicator that reports itself as a sub-communicator.
    pub fn non_world() -> Self {
        Self {
            world: false,
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SelfComm {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_world(&self) -> bool {
        self.world
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_min(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        value
    }

    fn send(&self, dest: usize, tag: u32, data: &[f64]) {
        assert_eq!(dest, 0, "single-rank communicator");
        self.queues
            .lock()
            .unwrap()
            .entry(tag)
            .or_default()
            .push_back(data.to_vec());
    }

    fn recv(&self, src: usize, tag: u32) -> Vec<f64> {
        assert_eq!(src, 0, "single-rank communicator");
        self.queues
            .lock()
            .unwrap()
            .get_mut(&tag)
            .and_then(|q| q.pop_front())
            .expect("receive without matching self-send would deadlock")
    }

    fn barrier(&self) {}
}

struct LocalShared {
    size: usize,
    world: bool,
    mail: Mutex<HashMap<(usize, usize, u32), VecDeque<Vec<f64>>>>,
    delivered: Condvar,
    barrier: Barrier,
    reduce_slots: Mutex<Vec<f64>>,
}

/// One rank of an in-process rank group.
///
/// All ranks of a group share mailboxes and a barrier; each rank handle is
/// moved onto its own thread. Reductions are two-phase (write slot, barrier,
/// combine, barrier) so that back-to-back reductions cannot race.
pub struct LocalComm {
    rank: usize,
    shared: Arc<LocalShared>,
}

impl LocalComm {
    fn reduce_with(&self, value: f64, init: f64, op: fn(f64, f64) -> f64) -> f64 {
        {
            let mut slots = self.shared.reduce_slots.lock().unwrap();
            slots[self.rank] = value;
        }
        self.barrier();
        let result = {
            let slots = self.shared.reduce_slots.lock().unwrap();
            slots.iter().copied().fold(init, op)
        };
        self.barrier();
        result
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn is_world(&self) -> bool {
        self.shared.world
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        self.reduce_with(value, 0.0, |a, b| a + b)
    }

    fn all_reduce_min(&self, value: f64) -> f64 {
        self.reduce_with(value, f64::INFINITY, f64::min)
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        self.reduce_with(value, f64::NEG_INFINITY, f64::max)
    }

    fn send(&self, dest: usize, tag: u32, data: &[f64]) {
        assert!(dest < self.shared.size, "rank {dest} out of range");
        let mut mail = self.shared.mail.lock().unwrap();
        mail.entry((self.rank, dest, tag))
            .or_default()
            .push_back(data.to_vec());
        self.shared.delivered.notify_all();
    }

    fn recv(&self, src: usize, tag: u32) -> Vec<f64> {
        let key = (src, self.rank, tag);
        let mut mail = self.shared.mail.lock().unwrap();
        loop {
            if let Some(message) = mail.get_mut(&key).and_then(|q| q.pop_front()) {
                return message;
            }
            mail = self.shared.delivered.wait(mail).unwrap();
        }
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}

/// Factory for in-process rank groups.
pub struct LocalWorld;

impl LocalWorld {
    /// Create the rank handles of a `size`-rank group.
    pub fn communicators(size: usize) -> Vec<LocalComm> {
        Self::communicators_with(size, true)
    }

    /// Rank handles that report themselves as a sub-communicator.
    pub fn sub_communicators(size: usize) -> Vec<LocalComm> {
        Self::communicators_with(size, false)
    }

    fn communicators_with(size: usize, world: bool) -> Vec<LocalComm> {
        assert!(size > 0, "communicator needs at least one rank");
        let shared = Arc::new(LocalShared {
            size,
            world,
            mail: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
            barrier: Barrier::new(size),
            reduce_slots: Mutex::new(vec![0.0; size]),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run `f` once per rank on `size` threads and collect the per-rank
    /// results in rank order.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let comms = Self::communicators(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_comm_reductions_are_identity() {
        let comm = SelfComm::new();
        assert_eq!(comm.all_reduce_sum(3.5), 3.5);
        assert_eq!(comm.all_reduce_min(-1.0), -1.0);
        assert_eq!(comm.all_reduce_max(2.0), 2.0);
        assert!(comm.all_reduce_all(true));
        assert!(!comm.all_reduce_all(false));
    }

    #[test]
    fn self_comm_buffers_self_sends() {
        let comm = SelfComm::new();
        comm.send(0, 7, &[1.0, 2.0]);
        comm.send(0, 7, &[3.0]);
        assert_eq!(comm.recv(0, 7), vec![1.0, 2.0]);
        assert_eq!(comm.recv(0, 7), vec![3.0]);
    }

    #[test]
    fn local_comm_sum_reduction() {
        let sums = LocalWorld::run(4, |comm| comm.all_reduce_sum(comm.rank() as f64));
        assert!(sums.iter().all(|&s| (s - 6.0).abs() < 1e-15));
    }

    #[test]
    fn local_comm_min_max_reduction() {
        let results = LocalWorld::run(3, |comm| {
            let v = comm.rank() as f64 - 1.0;
            (comm.all_reduce_min(v), comm.all_reduce_max(v))
        });
        for (lo, hi) in results {
            assert_eq!(lo, -1.0);
            assert_eq!(hi, 1.0);
        }
    }

    #[test]
    fn local_comm_ring_exchange() {
        let received = LocalWorld::run(4, |comm| {
            let right = (comm.rank() + 1) % comm.size();
            let left = (comm.rank() + comm.size() - 1) % comm.size();
            comm.send(right, 0, &[comm.rank() as f64]);
            let msg = comm.recv(left, 0);
            comm.barrier();
            msg[0] as usize
        });
        assert_eq!(received, vec![3, 0, 1, 2]);
    }

    #[test]
    fn local_comm_all_gather_is_rank_ordered() {
        let gathered = LocalWorld::run(3, |comm| {
            comm.all_gather(&[comm.rank() as f64, 10.0 + comm.rank() as f64])
        });
        for g in gathered {
            assert_eq!(g, vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
        }
    }

    #[test]
    fn repeated_reductions_do_not_race() {
        let results = LocalWorld::run(4, |comm| {
            let mut acc = 0.0;
            for round in 0..32 {
                acc += comm.all_reduce_sum(round as f64);
            }
            acc
        });
        let expected: f64 = (0..32).map(|r| (r * 4) as f64).sum();
        for r in results {
            assert!((r - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn sub_communicator_is_not_world() {
        let comms = LocalWorld::sub_communicators(2);
        assert!(!comms[0].is_world());
        assert!(!comms[1].is_world());
    }
}
