//! Scoped output routing.
//!
//! Every chunk of interpreter output is tagged stdout or stderr and goes to
//! exactly one handler. Handlers form a stack: a turn pushes its own handler
//! on entry and pops it on the way out, so output produced while the turn
//! runs — including output from items served by a nested loop — lands with
//! the turn that is actually executing, not the one that is waiting.
//!
//! Each pushed handler gets a fresh id. Child-process reader threads capture
//! the id current at spawn time and address it explicitly, so late chunks
//! from a finished subprocess are dropped instead of leaking into whatever
//! turn runs next.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which stream a chunk of output belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    Stderr,
}

/// Sink for a chunk of output.
pub type OutputHandler = Box<dyn FnMut(&str, OutputKind)>;

/// Identifies a pushed handler for targeted writes.
pub type HandlerId = u64;

/// Id of the base handler installed at session startup.
pub const BASE_HANDLER_ID: HandlerId = 0;

pub struct OutputRouter {
    base: OutputHandler,
    stack: Vec<(HandlerId, OutputHandler)>,
    next_id: HandlerId,
}

impl OutputRouter {
    pub fn new(base: OutputHandler) -> Self {
        Self {
            base,
            stack: Vec::new(),
            next_id: BASE_HANDLER_ID + 1,
        }
    }

    /// Installs `handler` as the active sink and returns its id.
    pub fn push(&mut self, handler: OutputHandler) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;
        self.stack.push((id, handler));
        id
    }

    /// Removes the handler with `id`.
    ///
    /// Pops are expected in reverse push order; an out-of-order pop still
    /// removes the right handler.
    pub fn pop(&mut self, id: HandlerId) {
        let before = self.stack.len();
        self.stack.retain(|(handler_id, _)| *handler_id != id);
        if self.stack.len() == before {
            debug!(id, "pop of unknown output handler");
        }
    }

    /// Id of the handler that currently receives untargeted writes.
    pub fn current_id(&self) -> HandlerId {
        self.stack.last().map_or(BASE_HANDLER_ID, |(id, _)| *id)
    }

    /// Sends a chunk to the active handler.
    pub fn write(&mut self, text: &str, kind: OutputKind) {
        match self.stack.last_mut() {
            Some((_, handler)) => handler(text, kind),
            None => (self.base)(text, kind),
        }
    }

    /// Sends a chunk to the handler with `id`, if it is still installed.
    /// Chunks addressed to a popped handler are dropped.
    pub fn write_to(&mut self, id: HandlerId, text: &str, kind: OutputKind) {
        if id == BASE_HANDLER_ID {
            (self.base)(text, kind);
            return;
        }
        match self.stack.iter_mut().find(|(handler_id, _)| *handler_id == id) {
            Some((_, handler)) => handler(text, kind),
            None => debug!(id, "dropping output for retired handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collector() -> (Rc<RefCell<Vec<(String, OutputKind)>>>, OutputHandler) {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let writer = Rc::clone(&sink);
        let handler: OutputHandler =
            Box::new(move |text, kind| writer.borrow_mut().push((text.to_owned(), kind)));
        (sink, handler)
    }

    #[test]
    fn innermost_handler_wins() {
        let (base_sink, base) = collector();
        let (inner_sink, inner) = collector();
        let mut router = OutputRouter::new(base);
        router.write("a", OutputKind::Stdout);
        let id = router.push(inner);
        router.write("b", OutputKind::Stderr);
        router.pop(id);
        router.write("c", OutputKind::Stdout);
        assert_eq!(
            *base_sink.borrow(),
            vec![
                ("a".to_owned(), OutputKind::Stdout),
                ("c".to_owned(), OutputKind::Stdout)
            ]
        );
        assert_eq!(*inner_sink.borrow(), vec![("b".to_owned(), OutputKind::Stderr)]);
    }

    #[test]
    fn targeted_write_survives_nesting() {
        let (_, base) = collector();
        let (outer_sink, outer) = collector();
        let (_, inner) = collector();
        let mut router = OutputRouter::new(base);
        let outer_id = router.push(outer);
        let inner_id = router.push(inner);
        router.write_to(outer_id, "late chunk", OutputKind::Stdout);
        router.pop(inner_id);
        router.pop(outer_id);
        assert_eq!(
            *outer_sink.borrow(),
            vec![("late chunk".to_owned(), OutputKind::Stdout)]
        );
    }

    #[test]
    fn write_to_retired_handler_is_dropped() {
        let (base_sink, base) = collector();
        let (inner_sink, inner) = collector();
        let mut router = OutputRouter::new(base);
        let id = router.push(inner);
        router.pop(id);
        router.write_to(id, "straggler", OutputKind::Stdout);
        assert!(base_sink.borrow().is_empty());
        assert!(inner_sink.borrow().is_empty());
    }
}
