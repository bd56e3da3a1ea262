//! Asynchronous session events and the bounded channel that carries them.
//!
//! Events flow one way: the executor thread pushes, the caller's event pump
//! pulls. The channel deliberately holds at most [`EventQueue::CAPACITY`]
//! events; a full queue blocks the executor, so a caller that stops pulling
//! eventually stalls evaluation instead of growing memory without bound.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::parse::SourcePosition;

/// One frame of an interpreter call stack, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function name, or `None` for top-level code.
    pub function: Option<String>,
    pub position: SourcePosition,
}

/// Why an [`AsyncEvent::Exception`] was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExceptionCause {
    /// An ordinary evaluation error.
    Error { message: String },
    /// `library()` named a package that is not installed.
    PackageNotFound { message: String, package: String },
    /// Evaluation was interrupted. Carries no stack.
    Interrupted,
}

impl ExceptionCause {
    pub fn message(&self) -> &str {
        match self {
            Self::Error { message } | Self::PackageNotFound { message, .. } => message,
            Self::Interrupted => "Interrupted",
        }
    }
}

/// Out-of-band notifications from the session to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AsyncEvent {
    /// Evaluation of a turn has begun.
    Busy,
    /// The session is idle at top level again.
    Prompt,
    /// The session is idle at a debugger stop.
    DebugPrompt {
        /// True when this stop is new, false when re-announcing the same
        /// stop after a turn executed at it.
        changed: bool,
        /// Innermost frame last.
        stack: Vec<StackFrame>,
    },
    /// Running code asked for a line of input.
    RequestReadLine { prompt: String },
    /// A REPL turn ended with an uncaught fault.
    Exception {
        cause: ExceptionCause,
        /// Where the fault was raised; empty for interrupts.
        stack: Vec<StackFrame>,
    },
    /// A variable changed through the remote mutation API.
    ValueChanged { name: String },
}

struct QueueInner {
    items: VecDeque<AsyncEvent>,
    closed: bool,
}

/// Bounded blocking queue of [`AsyncEvent`]s.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    /// Signalled when an item is added or the queue closes.
    readable: Condvar,
    /// Signalled when an item is removed or the queue closes.
    writable: Condvar,
}

impl EventQueue {
    /// Maximum number of undelivered events.
    pub const CAPACITY: usize = 8;

    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(Self::CAPACITY),
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Appends an event, blocking while the queue is full. Dropped silently
    /// once the queue is closed.
    pub fn push(&self, event: AsyncEvent) {
        let mut inner = self.inner.lock();
        while inner.items.len() >= Self::CAPACITY && !inner.closed {
            self.writable.wait(&mut inner);
        }
        if inner.closed {
            return;
        }
        inner.items.push_back(event);
        self.readable.notify_one();
    }

    /// Removes the oldest event, blocking while the queue is empty. Returns
    /// `None` once the queue is closed and drained.
    pub fn pull(&self) -> Option<AsyncEvent> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.items.pop_front() {
                self.writable.notify_one();
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            self.readable.wait(&mut inner);
        }
    }

    /// Closes the queue: pending pulls drain what remains and then observe
    /// end of stream, pending and future pushes return immediately.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wire_shape_is_tagged_camel_case() {
        let event = AsyncEvent::Exception {
            cause: ExceptionCause::PackageNotFound {
                message: "there is no package called 'zoo'".to_owned(),
                package: "zoo".to_owned(),
            },
            stack: vec![StackFrame {
                function: None,
                position: SourcePosition {
                    file_id: "<console>".to_owned(),
                    line: 1,
                },
            }],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "exception");
        assert_eq!(json["cause"]["kind"], "packageNotFound");
        assert_eq!(json["cause"]["package"], "zoo");
        assert_eq!(json["stack"][0]["function"], serde_json::Value::Null);
    }

    #[test]
    fn events_arrive_in_order() {
        let queue = EventQueue::new();
        queue.push(AsyncEvent::Busy);
        queue.push(AsyncEvent::Prompt);
        assert_eq!(queue.pull(), Some(AsyncEvent::Busy));
        assert_eq!(queue.pull(), Some(AsyncEvent::Prompt));
    }

    #[test]
    fn full_queue_blocks_until_pulled() {
        let queue = Arc::new(EventQueue::new());
        for _ in 0..EventQueue::CAPACITY {
            queue.push(AsyncEvent::Busy);
        }
        let pusher = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(AsyncEvent::Prompt))
        };
        // The push above cannot finish until we make room.
        std::thread::sleep(Duration::from_millis(30));
        assert!(!pusher.is_finished());
        assert_eq!(queue.pull(), Some(AsyncEvent::Busy));
        pusher.join().unwrap();
    }

    #[test]
    fn close_drains_then_ends() {
        let queue = EventQueue::new();
        queue.push(AsyncEvent::Busy);
        queue.close();
        assert_eq!(queue.pull(), Some(AsyncEvent::Busy));
        assert_eq!(queue.pull(), None);
        queue.push(AsyncEvent::Prompt);
        assert_eq!(queue.pull(), None);
    }

    #[test]
    fn close_wakes_blocked_pull() {
        let queue = Arc::new(EventQueue::new());
        let puller = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pull())
        };
        std::thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(puller.join().unwrap(), None);
    }
}
