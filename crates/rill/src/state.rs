//! The session state machine.
//!
//! The state is written only by the executor thread, but other threads read
//! it to decide how to route interrupts and input. [`StateCell`] gives them
//! an eventually-consistent snapshot without taking a lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// What the session is doing right now.
///
/// Transitions are stack-disciplined: a turn saves the current state with a
/// [`StateGuard`], switches to a nested state while a nested loop runs, and
/// the guard restores the outer state when the wait ends — even on a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplState {
    /// Idle at top level, ready for code.
    Prompt,
    /// Idle at a debugger stop, ready for code or a debug command.
    DebugPrompt,
    /// Evaluating code called `readline()`; waiting for a line.
    ReadLine,
    /// Evaluating code.
    Busy,
    /// A child process is running and its output streams to the caller.
    ChildProcess,
    /// A child process is consuming caller-supplied input.
    SubprocessInput,
}

impl ReplState {
    fn code(self) -> u8 {
        match self {
            Self::Prompt => 0,
            Self::DebugPrompt => 1,
            Self::ReadLine => 2,
            Self::Busy => 3,
            Self::ChildProcess => 4,
            Self::SubprocessInput => 5,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Prompt,
            1 => Self::DebugPrompt,
            2 => Self::ReadLine,
            4 => Self::ChildProcess,
            5 => Self::SubprocessInput,
            _ => Self::Busy,
        }
    }
}

/// Lock-free holder of the current [`ReplState`].
///
/// Foreign threads may read a value that is about to change; routing
/// decisions based on it must therefore be re-checked on the executor thread
/// before acting (posted interrupt and input handlers do exactly that).
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Starts in [`ReplState::Busy`]: the session reports busy until its
    /// startup task has run and posted the first prompt.
    pub fn new() -> Self {
        Self(AtomicU8::new(ReplState::Busy.code()))
    }

    pub fn load(&self) -> ReplState {
        ReplState::from_code(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ReplState) {
        self.0.store(state.code(), Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped state assignment; restores the previous state on drop.
pub struct StateGuard<'c> {
    cell: &'c StateCell,
    prev: ReplState,
}

impl<'c> StateGuard<'c> {
    pub fn enter(cell: &'c StateCell, state: ReplState) -> Self {
        let prev = cell.load();
        cell.store(state);
        Self { cell, prev }
    }

    /// The state this guard will restore.
    pub fn previous(&self) -> ReplState {
        self.prev
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.cell.store(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_starts_busy() {
        assert_eq!(StateCell::new().load(), ReplState::Busy);
    }

    #[test]
    fn guard_restores_on_drop() {
        let cell = StateCell::new();
        cell.store(ReplState::Prompt);
        {
            let guard = StateGuard::enter(&cell, ReplState::ReadLine);
            assert_eq!(cell.load(), ReplState::ReadLine);
            assert_eq!(guard.previous(), ReplState::Prompt);
            {
                let _inner = StateGuard::enter(&cell, ReplState::Busy);
                assert_eq!(cell.load(), ReplState::Busy);
            }
            assert_eq!(cell.load(), ReplState::ReadLine);
        }
        assert_eq!(cell.load(), ReplState::Prompt);
    }

    #[test]
    fn every_state_round_trips() {
        for state in [
            ReplState::Prompt,
            ReplState::DebugPrompt,
            ReplState::ReadLine,
            ReplState::Busy,
            ReplState::ChildProcess,
            ReplState::SubprocessInput,
        ] {
            let cell = StateCell::new();
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }
}
