use std::{
    io::{self, BufRead, BufReader, Write},
    sync::Arc,
};

use parking_lot::Mutex;
use rill::Session;
use rill_service::ServiceHandler;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// JSON-RPC request payload accepted by this server.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn main() -> io::Result<()> {
    // Protocol traffic owns stdout; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let handler = Arc::new(ServiceHandler::new(Arc::new(Session::new())));
    let writer = Arc::new(Mutex::new(io::stdout()));

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    info!("rill service listening on stdio");

    while let Some(body) = read_framed_message(&mut reader)? {
        let raw_message = match serde_json::from_slice::<Value>(&body) {
            Ok(message) => message,
            Err(err) => {
                let response = error_response(&Value::Null, -32700, &format!("parse error: {err}"));
                write_framed_message(&mut *writer.lock(), &response)?;
                continue;
            }
        };

        if is_json_rpc_notification(&raw_message) {
            continue;
        }

        let request = match serde_json::from_value::<RpcRequest>(raw_message) {
            Ok(request) => request,
            Err(err) => {
                let response = error_response(&Value::Null, -32700, &format!("parse error: {err}"));
                write_framed_message(&mut *writer.lock(), &response)?;
                continue;
            }
        };

        if request.method == "shutdown" {
            let response = success_response(&request.id, &json!({}));
            write_framed_message(&mut *writer.lock(), &response)?;
            break;
        }

        // One thread per request: a blocking executeTurn must not stop
        // sendLine, interrupt, or the event pump from being served.
        let handler = Arc::clone(&handler);
        let writer = Arc::clone(&writer);
        std::thread::spawn(move || {
            debug!(method = %request.method, "dispatching request");
            let response = match handler.dispatch(&request.method, request.params) {
                Ok(result) => success_response(&request.id, &result),
                Err(err) => error_response(&request.id, err.code, &err.message),
            };
            if write_framed_message(&mut *writer.lock(), &response).is_err() {
                debug!("dropping response; stdout is closed");
            }
        });
    }

    Ok(())
}

/// Returns true when the payload is a JSON-RPC 2.0 notification.
fn is_json_rpc_notification(payload: &Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };

    object.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        && object.get("method").is_some_and(Value::is_string)
        && !object.contains_key("id")
}

fn success_response(id: &Value, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Reads one Content-Length framed message body from stdin.
fn read_framed_message(reader: &mut impl BufRead) -> io::Result<Option<Vec<u8>>> {
    let mut content_length = None;
    loop {
        let mut header_line = String::new();
        let read = reader.read_line(&mut header_line)?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|err| io::Error::other(format!("bad Content-Length: {err}")))?;
            content_length = Some(length);
        }
    }

    let Some(length) = content_length else {
        return Err(io::Error::other("missing Content-Length header"));
    };
    let mut body = vec![0; length];
    io::Read::read_exact(reader, &mut body)?;
    Ok(Some(body))
}

/// Writes one Content-Length framed message.
fn write_framed_message(writer: &mut impl Write, message: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}
