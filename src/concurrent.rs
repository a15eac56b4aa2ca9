//! Bounded-concurrency task collections: `Pool` (completion order), `Queue`
//! (submission order), `Heap` (priority order). Ported from
//! `examples/original_source/getm/concurrent/collections.py`'s
//! `ConcurrentPool`/`ConcurrentQueue`/`ConcurrentHeap`, which ran work in
//! `ProcessPoolExecutor` workers; here `smol::spawn` tasks play that role
//! since there's no GIL forcing separate processes.

use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;

use futures::future::select_all;

type BoxFut<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Unordered collection: results come back in completion order. Up to
/// `concurrency` operations run in parallel; `put` admits more from the
/// backlog as capacity frees up.
pub struct Pool<T: Send + 'static> {
    concurrency: usize,
    scheduled: VecDeque<BoxFut<T>>,
    running: Vec<smol::Task<T>>,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency > 0);
        Pool {
            concurrency,
            scheduled: VecDeque::new(),
            running: Vec::new(),
        }
    }

    fn admit(&mut self) {
        while self.running.len() < self.concurrency {
            match self.scheduled.pop_front() {
                Some(fut) => self.running.push(smol::spawn(fut)),
                None => break,
            }
        }
    }

    pub fn put(&mut self, fut: impl Future<Output = T> + Send + 'static) {
        self.scheduled.push_back(Box::pin(fut));
        self.admit();
    }

    pub fn len(&self) -> usize {
        self.scheduled.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next operation to complete, in whatever order they
    /// finish. `None` once everything scheduled has been retrieved.
    pub async fn get(&mut self) -> Option<T> {
        if self.running.is_empty() {
            return None;
        }
        let running = std::mem::take(&mut self.running);
        let (result, _index, rest) = select_all(running).await;
        self.running = rest;
        self.admit();
        Some(result)
    }

    /// Cancel every scheduled-but-not-started operation and wait for
    /// whatever is already running to finish.
    pub async fn abort(&mut self) {
        self.scheduled.clear();
        for task in self.running.drain(..) {
            task.cancel().await;
        }
    }
}

/// FIFO collection: results are returned in submission order, even if a
/// later operation finishes first.
pub struct Queue<T: Send + 'static> {
    concurrency: usize,
    scheduled: VecDeque<BoxFut<T>>,
    running: VecDeque<smol::Task<T>>,
}

impl<T: Send + 'static> Queue<T> {
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency > 0);
        Queue {
            concurrency,
            scheduled: VecDeque::new(),
            running: VecDeque::new(),
        }
    }

    fn admit(&mut self) {
        while self.running.len() < self.concurrency {
            match self.scheduled.pop_front() {
                Some(fut) => self.running.push_back(smol::spawn(fut)),
                None => break,
            }
        }
    }

    pub fn put(&mut self, fut: impl Future<Output = T> + Send + 'static) {
        self.scheduled.push_back(Box::pin(fut));
        self.admit();
    }

    pub fn len(&self) -> usize {
        self.scheduled.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the oldest still-pending operation to finish, in the order
    /// operations were `put`.
    pub async fn get(&mut self) -> Option<T> {
        let task = self.running.pop_front()?;
        let result = task.await;
        self.admit();
        Some(result)
    }

    pub async fn abort(&mut self) {
        self.scheduled.clear();
        for task in self.running.drain(..) {
            task.cancel().await;
        }
    }
}

struct HeapEntry<T: Send + 'static> {
    priority: i64,
    seq: u64,
    fut: BoxFut<T>,
}

impl<T: Send + 'static> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        (self.priority, self.seq) == (other.priority, other.seq)
    }
}
impl<T: Send + 'static> Eq for HeapEntry<T> {}
impl<T: Send + 'static> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: Send + 'static> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // higher priority first; break ties in submission order (earlier first)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority collection: admission into the running set follows `priority`
/// (higher first, FIFO among equal priorities); completed results are
/// delivered in whatever order they finish, same as `Pool`.
pub struct Heap<T: Send + 'static> {
    concurrency: usize,
    scheduled: BinaryHeap<HeapEntry<T>>,
    running: Vec<smol::Task<T>>,
    next_seq: u64,
}

impl<T: Send + 'static> Heap<T> {
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency > 0);
        Heap {
            concurrency,
            scheduled: BinaryHeap::new(),
            running: Vec::new(),
            next_seq: 0,
        }
    }

    fn admit(&mut self) {
        while self.running.len() < self.concurrency {
            match self.scheduled.pop() {
                Some(entry) => self.running.push(smol::spawn(entry.fut)),
                None => break,
            }
        }
    }

    /// Queue `fut` with `priority`; higher values are admitted first.
    pub fn priority_put(&mut self, priority: i64, fut: impl Future<Output = T> + Send + 'static) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.push(HeapEntry {
            priority,
            seq,
            fut: Box::pin(fut),
        });
        self.admit();
    }

    /// Queue `fut` with the default priority (`1`).
    pub fn put(&mut self, fut: impl Future<Output = T> + Send + 'static) {
        self.priority_put(1, fut);
    }

    pub fn len(&self) -> usize {
        self.scheduled.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn get(&mut self) -> Option<T> {
        if self.running.is_empty() {
            return None;
        }
        let running = std::mem::take(&mut self.running);
        let (result, _index, rest) = select_all(running).await;
        self.running = rest;
        self.admit();
        Some(result)
    }

    pub async fn abort(&mut self) {
        self.scheduled.clear();
        for task in self.running.drain(..) {
            task.cancel().await;
        }
    }
}
