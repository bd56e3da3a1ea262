use std::sync::Arc;

use rill::{DebugCommand, Handle, Session, SessionError, TurnRequest};
use serde::Deserialize;
use serde_json::{Value, json};

// =============================================================================
// Errors
// =============================================================================

/// A JSON-RPC error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        let code = match err {
            SessionError::Fault { .. } => -32000,
            SessionError::StaleHandle(_) => -32001,
            SessionError::Cancelled => -32002,
            SessionError::Shutdown => -32003,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|err| RpcError::invalid_params(format!("invalid params: {err}")))
}

// =============================================================================
// ServiceHandler
// =============================================================================

/// Translates JSON requests into typed [`Session`] calls.
///
/// Every method here is `&self` and safe to call from any thread; the
/// session serializes the interesting work on its executor.
pub struct ServiceHandler {
    session: Arc<Session>,
}

impl ServiceHandler {
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Dispatches one request. `method` names follow the wire protocol.
    pub fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "executeTurn" => self.execute_turn(params),
            "sendLine" => self.send_line(params),
            "sendEof" => {
                self.session.send_eof();
                Ok(json!({}))
            }
            "interrupt" => {
                self.session.interrupt();
                Ok(json!({}))
            }
            "nextAsyncEvent" => self.next_async_event(),
            "isBusy" => Ok(json!({
                "busy": self.session.is_busy(),
                "state": self.session.state(),
            })),
            "debugCommand" => self.debug_command(params),
            "setBreakpoint" => self.set_breakpoint(params),
            "removeBreakpoint" => self.remove_breakpoint(params),
            "muteBreakpoints" => self.mute_breakpoints(params),
            "lastErrorStack" => Ok(json!({
                "stack": self.session.last_error_stack().map_err(RpcError::from)?,
            })),
            "copyToHandle" => self.copy_to_handle(params),
            "handleRepr" => self.handle_repr(params),
            "disposeHandles" => self.dispose_handles(params),
            "evaluateAsText" => self.evaluate_as_text(params),
            "listVariables" => Ok(json!({
                "variables": self.session.list_variables().map_err(RpcError::from)?,
            })),
            "setValue" => self.set_value(params),
            _ => Err(RpcError {
                code: -32601,
                message: format!("method not found: {method}"),
            }),
        }
    }

    // ==== turns ====

    fn execute_turn(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            code: String,
            #[serde(default)]
            source_file_id: Option<String>,
            #[serde(default)]
            line_offset: u32,
            #[serde(default)]
            with_echo: Option<bool>,
            #[serde(default = "default_true")]
            is_repl: bool,
            #[serde(default)]
            is_debug: bool,
        }

        fn default_true() -> bool {
            true
        }

        let params: Params = parse_params(params)?;
        let mut request = if params.is_repl {
            TurnRequest::repl(params.code)
        } else {
            TurnRequest::script(params.code)
        };
        if let Some(file_id) = params.source_file_id {
            request = request.with_source(file_id, params.line_offset);
        }
        if let Some(with_echo) = params.with_echo {
            request = request.with_echo(with_echo);
        }
        // Only REPL turns may park at a debugger stop.
        request = request.with_debug(params.is_repl && params.is_debug);

        let outputs = self.session.execute_turn(request).map_err(RpcError::from)?;
        Ok(json!({ "outputs": outputs }))
    }

    fn send_line(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct Params {
            line: String,
        }
        let params: Params = parse_params(params)?;
        self.session.send_line(params.line);
        Ok(json!({}))
    }

    // ==== events ====

    fn next_async_event(&self) -> Result<Value, RpcError> {
        // Blocks this request thread until an event arrives. A null result
        // means the session has shut down and the caller should stop
        // pumping.
        match self.session.next_async_event() {
            Some(event) => Ok(json!({ "event": event })),
            None => Ok(json!({ "event": Value::Null })),
        }
    }

    // ==== debugging ====

    fn debug_command(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct Params {
            command: DebugCommand,
        }
        let params: Params = parse_params(params)?;
        self.session.send_debug_command(params.command);
        Ok(json!({}))
    }

    fn set_breakpoint(&self, params: Value) -> Result<Value, RpcError> {
        let params: BreakpointParams = parse_params(params)?;
        self.session.set_breakpoint(params.file_id, params.line);
        Ok(json!({}))
    }

    fn remove_breakpoint(&self, params: Value) -> Result<Value, RpcError> {
        let params: BreakpointParams = parse_params(params)?;
        self.session.remove_breakpoint(params.file_id, params.line);
        Ok(json!({}))
    }

    fn mute_breakpoints(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct Params {
            muted: bool,
        }
        let params: Params = parse_params(params)?;
        self.session.mute_breakpoints(params.muted);
        Ok(json!({}))
    }

    // ==== inspection and mutation ====

    fn copy_to_handle(&self, params: Value) -> Result<Value, RpcError> {
        let params: CodeParams = parse_params(params)?;
        let handle = self
            .session
            .copy_to_handle(params.code)
            .map_err(RpcError::from)?;
        Ok(json!({ "handle": handle }))
    }

    fn handle_repr(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct Params {
            handle: Handle,
        }
        let params: Params = parse_params(params)?;
        let repr = self
            .session
            .handle_repr(params.handle)
            .map_err(RpcError::from)?;
        Ok(json!({ "repr": repr }))
    }

    fn dispose_handles(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct Params {
            handles: Vec<Handle>,
        }
        let params: Params = parse_params(params)?;
        self.session.dispose_handles(params.handles);
        Ok(json!({}))
    }

    fn evaluate_as_text(&self, params: Value) -> Result<Value, RpcError> {
        let params: CodeParams = parse_params(params)?;
        let text = self
            .session
            .evaluate_as_text(params.code)
            .map_err(RpcError::from)?;
        Ok(json!({ "text": text }))
    }

    fn set_value(&self, params: Value) -> Result<Value, RpcError> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            code: String,
        }
        let params: Params = parse_params(params)?;
        self.session
            .set_value(params.name, params.code)
            .map_err(RpcError::from)?;
        Ok(json!({}))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreakpointParams {
    file_id: String,
    line: u32,
}

#[derive(Deserialize)]
struct CodeParams {
    code: String,
}
