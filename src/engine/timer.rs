//! Deadline scheduler thread
//!
//! One thread owns a min-heap of deadlines and sleeps on its command channel
//! until the earliest one is due. Arming and cancelling are channel sends, so
//! they are cheap enough to do while the engine holds its state lock.
//!
//! Cancellation is lazy: a cancelled deadline stays in the heap but is
//! forgotten in the `armed` map, and is skipped when it comes due. A callback
//! can still race with a cancel that was sent just before it fired; the
//! engine guards against that by comparing handles under its own lock.
//!
//! [`DeadlineScheduler::cancel_all`] is synchronous: it returns only after the
//! thread has dropped every deadline, so no callback is running or pending.

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Identifies one armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineHandle(u64);

/// Called on the scheduler thread when a deadline expires
pub type DeadlineCallback = Box<dyn Fn(u16, DeadlineHandle) + Send + 'static>;

enum TimerCommand {
    Arm {
        handle: DeadlineHandle,
        slot: u16,
        at: Instant,
    },
    Cancel(DeadlineHandle),
    /// Acknowledged once the heap is empty
    CancelAll(Sender<()>),
    Shutdown,
}

pub struct DeadlineScheduler {
    tx: Sender<TimerCommand>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineScheduler {
    /// Start the scheduler thread
    pub fn spawn(callback: DeadlineCallback) -> Result<Self> {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("deadline-timer".to_string())
            .spawn(move || timer_loop(rx, callback))
            .map_err(|source| Error::ThreadSpawn {
                name: "deadline-timer",
                source,
            })?;

        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Arm a deadline for `slot` after `delay`
    pub fn arm(&self, slot: u16, delay: Duration) -> DeadlineHandle {
        let handle = DeadlineHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let at = Instant::now() + delay;
        if self
            .tx
            .send(TimerCommand::Arm { handle, slot, at })
            .is_err()
        {
            log::error!("Deadline scheduler stopped, slot {} has no deadline", slot);
        }
        handle
    }

    pub fn cancel(&self, handle: DeadlineHandle) {
        let _ = self.tx.send(TimerCommand::Cancel(handle));
    }

    /// Forget every armed deadline and wait for the thread to confirm
    ///
    /// A callback that was already running when this was called has finished
    /// by the time it returns.
    pub fn cancel_all(&self) {
        if self.on_timer_thread() {
            log::error!("cancel_all called from a deadline callback, not waiting");
            let _ = self.tx.send(TimerCommand::CancelAll(bounded(1).0));
            return;
        }
        let (done_tx, done_rx) = bounded(1);
        if self.tx.send(TimerCommand::CancelAll(done_tx)).is_ok() {
            // Err means the thread already exited, which is just as final
            let _ = done_rx.recv();
        }
    }

    fn on_timer_thread(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Stop the thread and wait for it; further arms are dropped
    pub fn shutdown(&self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            // Never join ourselves if a callback ends up dropping the engine
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Deadline timer thread panicked");
            }
        }
    }
}

impl Drop for DeadlineScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(rx: Receiver<TimerCommand>, callback: DeadlineCallback) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut armed: HashMap<u64, u16> = HashMap::new();

    loop {
        let msg = match heap.peek() {
            Some(Reverse((at, _))) => {
                rx.recv_timeout(at.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match msg {
            Ok(TimerCommand::Arm { handle, slot, at }) => {
                heap.push(Reverse((at, handle.0)));
                armed.insert(handle.0, slot);
            }
            Ok(TimerCommand::Cancel(handle)) => {
                armed.remove(&handle.0);
            }
            Ok(TimerCommand::CancelAll(done)) => {
                log::debug!("Cancelling {} deadlines", armed.len());
                armed.clear();
                heap.clear();
                let _ = done.try_send(());
            }
            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some(&Reverse((at, id))) = heap.peek() {
            if at > now {
                break;
            }
            heap.pop();
            if let Some(slot) = armed.remove(&id) {
                callback(slot, DeadlineHandle(id));
            }
        }
    }

    log::debug!("Deadline timer thread exiting");
}
