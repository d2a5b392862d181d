/*!
Batching of items submitted by any number of concurrent producers into rounds delivered to a single
consumer action.

Each round is bounded by time measured from the round start and optionally by number of items. Rounds
are collected and delivered one after another by a background thread so the action is never called
concurrently; a slow action applies backpressure to producers through the bounded submission queue.

# Example

```rust
use round_batch::Batcher;
use std::time::Duration;

let (rounds, delivered) = crossbeam_channel::unbounded();

let batcher = Batcher::new(move |items: Vec<u32>| {
    // Ignore rounds that timed out without collecting anything
    if !items.is_empty() {
        rounds.send(items).unwrap();
    }
}, Duration::from_millis(100));

batcher.start().unwrap();

batcher.submit(1).unwrap();
batcher.submit(2).unwrap();
batcher.submit(3).unwrap();

assert_eq!(delivered.recv().unwrap(), [1, 2, 3]);
```

The `round` module provides the cutoff policy that can be used on its own with other means of awaiting
items.
!*/

pub mod channel;
pub mod round;

pub use channel::batcher::{Batcher, Options, Stats, Submitter, DEFAULT_QUEUE_CAPACITY};
pub use channel::{StartError, StoppedError};
