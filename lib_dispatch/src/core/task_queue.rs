//! # Task Queue
//!
//! FIFO queue of asynchronous tasks with an optional concurrency ceiling
//! (`0` means unbounded). A task that fails or panics still frees its slot and
//! the next queued task starts.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt};

use crate::utils::lock;

type Task = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

#[derive(Default)]
struct QueueState {
    running: usize,
    queue: VecDeque<Task>,
}

pub struct TaskQueue {
    max_concurrency: AtomicUsize,
    state: Mutex<QueueState>,
    peak_running: AtomicUsize,
}

impl TaskQueue {
    pub fn new(max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            max_concurrency: AtomicUsize::new(max_concurrency),
            state: Mutex::new(QueueState::default()),
            peak_running: AtomicUsize::new(0),
        })
    }

    /// Queues a task and starts it right away if a slot is free.
    pub fn add_task<F, Fut>(self: &Arc<Self>, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        lock(&self.state).queue.push_back(Box::new(move || task().boxed()));
        self.start_ready();
    }

    /// Changes the ceiling. Raising it starts queued tasks immediately.
    pub fn set_max_concurrency(self: &Arc<Self>, max_concurrency: usize) {
        self.max_concurrency.store(max_concurrency, Ordering::SeqCst);
        self.start_ready();
    }

    pub fn running(&self) -> usize {
        lock(&self.state).running
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Highest number of tasks ever observed running at once.
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    fn start_ready(self: &Arc<Self>) {
        loop {
            let task = {
                let mut state = lock(&self.state);
                let max = self.max_concurrency.load(Ordering::SeqCst);
                if max > 0 && state.running >= max {
                    return;
                }
                let Some(task) = state.queue.pop_front() else {
                    return;
                };
                state.running += 1;
                self.peak_running.fetch_max(state.running, Ordering::SeqCst);
                task
            };

            let this = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    log::error!("[queue] task panicked; slot released");
                }
                this.finish_one();
            });
        }
    }

    fn finish_one(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            state.running = state.running.saturating_sub(1);
        }
        self.start_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_ceiling() {
        let queue = TaskQueue::new(2);
        let live = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for i in 0..6u64 {
            let live = Arc::clone(&live);
            let done_tx = done_tx.clone();
            queue.add_task(move || async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                assert!(now <= 2);
                tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
                live.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(i);
            });
        }
        assert_eq!(queue.running(), 2);
        assert_eq!(queue.queued(), 4);

        let mut finished = Vec::new();
        for _ in 0..6 {
            finished.push(done_rx.recv().await.unwrap());
        }
        finished.sort();
        assert_eq!(finished, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(queue.peak_running(), 2);
        tokio::task::yield_now().await;
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let queue = TaskQueue::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel();

        queue.add_task(|| async { panic!("boom") });
        queue.add_task(move || async move {
            let _ = tx.send("ran");
        });

        assert_eq!(rx.await.unwrap(), "ran");
    }

    #[tokio::test]
    async fn zero_means_unbounded() {
        let queue = TaskQueue::new(0);
        let gate = Arc::new(tokio::sync::Notify::new());
        for _ in 0..5 {
            let gate = Arc::clone(&gate);
            queue.add_task(move || async move { gate.notified().await });
        }
        assert_eq!(queue.running(), 5);
        assert_eq!(queue.queued(), 0);
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn raising_the_ceiling_starts_queued_tasks() {
        let queue = TaskQueue::new(1);
        let gate = Arc::new(tokio::sync::Notify::new());
        for _ in 0..3 {
            let gate = Arc::clone(&gate);
            queue.add_task(move || async move { gate.notified().await });
        }
        assert_eq!(queue.running(), 1);
        queue.set_max_concurrency(3);
        assert_eq!(queue.running(), 3);
        gate.notify_waiters();
    }
}
