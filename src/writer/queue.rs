use std::{cmp::Ordering, collections::BinaryHeap};

use tokio::sync::mpsc::UnboundedSender;

use super::protocol::{Task, TaskResponse};

/// A task together with where its reply goes
#[derive(Debug)]
pub struct Envelope {
    pub task: Task,
    pub priority: i64,
    pub reply: UnboundedSender<TaskResponse>,
}

struct Queued {
    envelope: Envelope,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // max heap: higher priority first, then lower sequence (arrived earlier)
    fn cmp(&self, other: &Self) -> Ordering {
        self.envelope
            .priority
            .cmp(&other.envelope.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending writer tasks, highest priority first and FIFO among equal priorities
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: Envelope) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(Queued { envelope, seq });
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        self.heap.pop().map(|q| q.envelope)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
