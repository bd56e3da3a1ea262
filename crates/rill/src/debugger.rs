//! Statement-level debugger bookkeeping.
//!
//! The evaluator reports every statement boundary and call entry/exit here;
//! the debugger decides where to stop and keeps the live call stack that
//! debug prompts and exception events report.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::events::StackFrame;
use crate::parse::SourcePosition;

/// How to proceed from a debugger stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebugCommand {
    /// Run until the next breakpoint.
    #[default]
    Continue,
    /// Stop at the very next statement.
    Pause,
    /// Abandon evaluation as if interrupted.
    Stop,
    /// Stop at the next statement at the same or a shallower call depth.
    StepOver,
    /// Stop at the next statement, entering calls.
    StepInto,
    /// Stop at the next statement after the current call returns.
    StepOut,
}

pub struct Debugger {
    breakpoints: AHashSet<(String, u32)>,
    muted: bool,
    command: DebugCommand,
    /// Call depth at the stop where the current step command was issued.
    step_depth: usize,
    stack: Vec<StackFrame>,
    last_error_stack: Vec<StackFrame>,
}

impl Debugger {
    pub fn new() -> Self {
        Self {
            breakpoints: AHashSet::new(),
            muted: false,
            command: DebugCommand::Continue,
            step_depth: 0,
            stack: Vec::new(),
            last_error_stack: Vec::new(),
        }
    }

    // ==== breakpoints ====

    pub fn set_breakpoint(&mut self, file_id: impl Into<String>, line: u32) {
        self.breakpoints.insert((file_id.into(), line));
    }

    pub fn remove_breakpoint(&mut self, file_id: &str, line: u32) {
        self.breakpoints.remove(&(file_id.to_owned(), line));
    }

    /// While muted, breakpoints are ignored; explicit step commands still
    /// stop.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    // ==== stepping ====

    /// Records the command chosen at a debugger stop, remembering the depth
    /// the step commands are relative to.
    pub fn resume_with(&mut self, command: DebugCommand, depth: usize) {
        self.command = command;
        self.step_depth = depth;
    }

    pub fn command(&self) -> DebugCommand {
        self.command
    }

    /// Drops any pending step command. Called at the start of a fresh
    /// top-level turn so a stale "pause" cannot stop unrelated code.
    pub fn reset_command(&mut self) {
        self.command = DebugCommand::Continue;
        self.step_depth = 0;
    }

    /// Whether evaluation should stop at the statement starting at `pos`,
    /// executing at call depth `depth`.
    pub fn should_stop(&self, pos: &SourcePosition, depth: usize) -> bool {
        match self.command {
            DebugCommand::Pause | DebugCommand::StepInto => true,
            DebugCommand::StepOver => depth <= self.step_depth,
            DebugCommand::StepOut => depth < self.step_depth,
            DebugCommand::Continue | DebugCommand::Stop => {
                !self.muted && self.breakpoints.contains(&(pos.file_id.clone(), pos.line))
            }
        }
    }

    // ==== live stack ====

    pub fn enter_call(&mut self, function: Option<String>, pos: SourcePosition) {
        self.stack.push(StackFrame {
            function,
            position: pos,
        });
    }

    pub fn exit_call(&mut self) {
        self.stack.pop();
    }

    /// Drops frames above `depth`. A fault unwinds evaluation without
    /// popping its frames one by one; the turn restores the stack wholesale.
    pub fn truncate_stack(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    /// Updates the innermost frame to the statement about to execute.
    pub fn set_top_position(&mut self, pos: SourcePosition) {
        if let Some(top) = self.stack.last_mut() {
            top.position = pos;
        }
    }

    /// Snapshot of the live stack, innermost frame last.
    pub fn capture_stack(&self) -> Vec<StackFrame> {
        self.stack.clone()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    // ==== last error ====

    pub fn record_error_stack(&mut self, stack: Vec<StackFrame>) {
        self.last_error_stack = stack;
    }

    /// Stack recorded at the most recent uncaught fault, innermost frame
    /// last.
    pub fn capture_error_stack(&self) -> Vec<StackFrame> {
        self.last_error_stack.clone()
    }

    pub fn clear_error_stack(&mut self) {
        self.last_error_stack.clear();
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32) -> SourcePosition {
        SourcePosition {
            file_id: "script.R".to_owned(),
            line,
        }
    }

    #[test]
    fn continue_stops_only_at_breakpoints() {
        let mut debugger = Debugger::new();
        debugger.set_breakpoint("script.R", 3);
        assert!(!debugger.should_stop(&pos(2), 0));
        assert!(debugger.should_stop(&pos(3), 0));
        debugger.set_muted(true);
        assert!(!debugger.should_stop(&pos(3), 0));
    }

    #[test]
    fn step_over_skips_deeper_frames() {
        let mut debugger = Debugger::new();
        debugger.resume_with(DebugCommand::StepOver, 1);
        assert!(!debugger.should_stop(&pos(1), 2));
        assert!(debugger.should_stop(&pos(1), 1));
        assert!(debugger.should_stop(&pos(1), 0));
    }

    #[test]
    fn step_out_waits_for_return() {
        let mut debugger = Debugger::new();
        debugger.resume_with(DebugCommand::StepOut, 2);
        assert!(!debugger.should_stop(&pos(1), 2));
        assert!(debugger.should_stop(&pos(1), 1));
    }

    #[test]
    fn stack_tracks_calls() {
        let mut debugger = Debugger::new();
        debugger.enter_call(None, pos(1));
        debugger.enter_call(Some("f".to_owned()), pos(4));
        debugger.set_top_position(pos(5));
        let stack = debugger.capture_stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[1].function.as_deref(), Some("f"));
        assert_eq!(stack[1].position.line, 5);
        debugger.exit_call();
        assert_eq!(debugger.depth(), 1);
    }
}
