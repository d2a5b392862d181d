/*!
This module provides `Batcher` that collects items submitted by any number of producers into rounds and
delivers each round to a single action running on a background thread.

A round ends when its time budget (`timeout`) has elapsed since the round started or, if configured,
when it has collected `max_batch_size` items, whichever comes first. The action is called synchronously
by the collection thread so calls never overlap and the next round starts only after the action returns.

# Example

```rust
use round_batch::channel::batcher::{Batcher, Options};
use std::time::Duration;

let (rounds, delivered) = crossbeam_channel::unbounded();

// Deliver rounds of at most 2 items or whatever arrived within 100 ms
let batcher = Batcher::with_options(move |items: Vec<&str>| {
    rounds.send(items).unwrap();
}, Duration::from_millis(100), Options::default().max_batch_size(2).deliver_empty_rounds(false));

// Items cannot be submitted until collection is started
batcher.start().unwrap();

batcher.submit("My").unwrap();
batcher.submit("Name").unwrap();
batcher.submit("Is").unwrap();
batcher.submit("Wawan").unwrap();

// Round cut off by size limit
assert_eq!(delivered.recv().unwrap(), ["My", "Name"]);
assert_eq!(delivered.recv().unwrap(), ["Is", "Wawan"]);
```

# Failure of the action

The action runs on the collection thread. If it panics the thread unwinds and the batcher stops
delivering for good; any further `submit` returns `Err(StoppedError)` with the item. Set
`Options::catch_panics` to isolate each call instead: a panicking round is logged, counted in
`Stats::panicked_rounds` and its items are dropped, and collection carries on.
!*/

use crate::channel::{StartError, StoppedError};
use crate::round::{Cutoff, PollResult, Round};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};
use tracing::{debug, error, trace};

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Capacity of the submission queue unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Construction time options of `Batcher`.
#[derive(Debug, Clone)]
pub struct Options {
    max_batch_size: usize,
    queue_capacity: usize,
    deliver_empty_rounds: bool,
    catch_panics: bool,
    thread_name: String,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            max_batch_size: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            deliver_empty_rounds: true,
            catch_panics: false,
            thread_name: "round-batch collector".to_string(),
        }
    }
}

impl Options {
    /// Maximum number of items delivered in single round; 0 (default) for no limit.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Options {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Number of items that can be queued before `submit` starts blocking.
    ///
    /// Value of 0 is ignored and the default of `DEFAULT_QUEUE_CAPACITY` is kept.
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Options {
        if queue_capacity > 0 {
            self.queue_capacity = queue_capacity;
        }
        self
    }

    /// Whether rounds that collected no items are delivered as empty `Vec` (default) or skipped.
    pub fn deliver_empty_rounds(mut self, deliver: bool) -> Options {
        self.deliver_empty_rounds = deliver;
        self
    }

    /// Isolate each action call so that a panic drops only that round instead of stopping the batcher.
    pub fn catch_panics(mut self, catch: bool) -> Options {
        self.catch_panics = catch;
        self
    }

    /// Name of the collection thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Options {
        self.thread_name = name.into();
        self
    }
}

/// Delivery statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of rounds the action has returned from.
    pub rounds: u64,
    /// Number of items in those rounds.
    pub items: u64,
    /// Number of rounds the action panicked on (only with `catch_panics`).
    pub panicked_rounds: u64,
    /// Number of empty rounds not delivered.
    pub empty_rounds_skipped: u64,
}

// All counters change together under one lock so that snapshots are consistent
#[derive(Debug, Default)]
struct Counters(Mutex<Stats>);

impl Counters {
    fn update(&self, update: impl FnOnce(&mut Stats)) {
        update(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn snapshot(&self) -> Stats {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Action<I> = Box<dyn FnMut(Vec<I>) + Send>;

/// Sending endpoint of a `Batcher` that can be cloned and moved to producer threads.
pub struct Submitter<I> {
    channel: Sender<I>,
    started: Arc<AtomicBool>,
}

impl<I> Clone for Submitter<I> {
    fn clone(&self) -> Submitter<I> {
        Submitter {
            channel: self.channel.clone(),
            started: self.started.clone(),
        }
    }
}

impl<I> fmt::Debug for Submitter<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Submitter")
            .field("started", &self.started.load(Ordering::Acquire))
            .field("queued", &self.channel.len())
            .finish()
    }
}

impl<I> Submitter<I> {
    /// Queues item for delivery in current or one of the next rounds.
    ///
    /// Blocks while the queue is full.
    ///
    /// Returns `Err(StoppedError)` with the item if the collection loop has terminated.
    ///
    /// Panics if the batcher was not started yet.
    pub fn submit(&self, item: I) -> Result<(), StoppedError<I>> {
        if !self.started.load(Ordering::Acquire) {
            panic!("batcher is not yet listening for input");
        }

        self.channel.send(item).map_err(|SendError(item)| StoppedError(item))
    }
}

// Receiving side of the batcher; owned by the collection thread once started
struct Collector<I> {
    channel: Receiver<I>,
    action: Action<I>,
    timeout: Duration,
    max_batch_size: usize,
    deliver_empty_rounds: bool,
    catch_panics: bool,
    counters: Arc<Counters>,
}

impl<I> Collector<I> {
    fn run(mut self) {
        loop {
            let (items, cutoff) = self.collect();
            self.deliver(items, cutoff);

            if cutoff == Cutoff::Disconnected {
                debug!("all submitters are gone; collection loop exiting");
                return
            }
        }
    }

    fn collect(&self) -> (Vec<I>, Cutoff) {
        let mut round = Round::new(self.max_batch_size, self.timeout);

        loop {
            // Check if round reached any limit or go fetch next item
            let ready_after = match round.poll() {
                PollResult::Ready(cutoff) => return (round.into_vec(), cutoff),
                PollResult::NotReady(ready_after) => ready_after,
            };

            match self.channel.recv_timeout(ready_after) {
                Ok(item) => {
                    round.append(item);
                    trace!(collected = round.len(), "item appended to round");
                }
                // Round should be ready now
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return (round.into_vec(), Cutoff::Disconnected),
            }
        }
    }

    fn deliver(&mut self, items: Vec<I>, cutoff: Cutoff) {
        if items.is_empty() {
            if cutoff == Cutoff::Disconnected {
                return
            }
            if !self.deliver_empty_rounds {
                self.counters.update(|stats| stats.empty_rounds_skipped += 1);
                return
            }
        }

        let len = items.len();
        debug!(items = len, ?cutoff, "delivering round");

        if self.catch_panics {
            let action = &mut self.action;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action(items))) {
                self.counters.update(|stats| stats.panicked_rounds += 1);
                error!(items = len, panic = panic_message(payload.as_ref()), "action panicked; round dropped");
                return
            }
        } else {
            (self.action)(items);
        }

        self.counters.update(|stats| {
            stats.rounds += 1;
            stats.items += len as u64;
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Collects items submitted concurrently into rounds bounded by time and optionally by size and
/// delivers each round to the action on a background thread.
///
/// `start()` must be called before any `submit()`.
pub struct Batcher<I> {
    submitter: Submitter<I>,
    // Taken by the collection thread
    pending: Arc<Mutex<Option<Collector<I>>>>,
    counters: Arc<Counters>,
    timeout: Duration,
    options: Options,
    #[cfg(test)]
    spawned_loops: Arc<std::sync::atomic::AtomicUsize>,
}

impl<I> fmt::Debug for Batcher<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("timeout", &self.timeout)
            .field("options", &self.options)
            .field("started", &self.submitter.started.load(Ordering::Acquire))
            .finish()
    }
}

impl<I: Send + 'static> Batcher<I> {
    /// Creates batcher that calls `action` with items collected every `timeout`.
    ///
    /// Panics if `timeout` is zero.
    pub fn new(action: impl FnMut(Vec<I>) + Send + 'static, timeout: Duration) -> Batcher<I> {
        Batcher::with_options(action, timeout, Options::default())
    }

    /// Creates batcher that calls `action` with items collected every `timeout` or as soon as
    /// `max_batch_size` items were collected if set in `options`.
    ///
    /// Panics if `timeout` is zero.
    pub fn with_options(
        action: impl FnMut(Vec<I>) + Send + 'static,
        timeout: Duration,
        options: Options,
    ) -> Batcher<I> {
        assert!(timeout > Duration::from_secs(0), "Batcher::new bad timeout");

        let (sender, receiver) = crossbeam_channel::bounded(options.queue_capacity);
        let counters = Arc::new(Counters::default());

        let collector = Collector {
            channel: receiver,
            action: Box::new(action),
            timeout,
            max_batch_size: options.max_batch_size,
            deliver_empty_rounds: options.deliver_empty_rounds,
            catch_panics: options.catch_panics,
            counters: counters.clone(),
        };

        Batcher {
            submitter: Submitter {
                channel: sender,
                started: Arc::new(AtomicBool::new(false)),
            },
            pending: Arc::new(Mutex::new(Some(collector))),
            counters,
            timeout,
            options,
            #[cfg(test)]
            spawned_loops: Default::default(),
        }
    }

    /// Starts collection loop in a background thread.
    ///
    /// Only the first successful call starts the loop; following calls, including concurrent ones,
    /// do nothing. Concurrent calls wait for the one starting the loop so `Ok(())` always means the
    /// loop is running.
    ///
    /// Returns `Err(StartError)` if the thread could not be spawned in which case the batcher stays
    /// not started and `start()` can be called again.
    pub fn start(&self) -> Result<(), StartError> {
        // Held until the started flag is set; the collection thread takes the collector after that
        let _pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let started = &self.submitter.started;
        if started.load(Ordering::Acquire) {
            return Ok(())
        }

        let pending = self.pending.clone();
        #[cfg(test)]
        let spawned_loops = self.spawned_loops.clone();
        std::thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || {
                #[cfg(test)]
                spawned_loops.fetch_add(1, Ordering::SeqCst);
                let collector = pending.lock().ok().and_then(|mut pending| pending.take());
                if let Some(collector) = collector {
                    collector.run()
                }
            })?;

        started.store(true, Ordering::Release);

        debug!(
            thread = %self.options.thread_name,
            timeout = ?self.timeout,
            max_batch_size = self.options.max_batch_size,
            queue_capacity = self.options.queue_capacity,
            "collection loop started"
        );
        Ok(())
    }

    /// Checks if `start()` was called.
    pub fn is_started(&self) -> bool {
        self.submitter.started.load(Ordering::Acquire)
    }

    /// Queues item for delivery in current or one of the next rounds.
    ///
    /// Blocks while the queue is full.
    ///
    /// Returns `Err(StoppedError)` with the item if the collection loop has terminated.
    ///
    /// Panics if `start()` was not called yet.
    pub fn submit(&self, item: I) -> Result<(), StoppedError<I>> {
        self.submitter.submit(item)
    }

    /// Returns a cloneable submission endpoint.
    ///
    /// Collection loop exits once this batcher and all its submitters are dropped and the last
    /// collected items were delivered.
    pub fn submitter(&self) -> Submitter<I> {
        self.submitter.clone()
    }

    /// Provides delivery statistics.
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }
}
