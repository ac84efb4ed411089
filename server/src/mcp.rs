//! The Model Context Protocol over streamable HTTP.
//!
//! Each `POST /mcp` carries a single JSON-RPC 2.0 message. Requests are answered with a JSON
//! response in the body; notifications and client responses are acknowledged with
//! `202 Accepted`. We never push messages to the client, so `GET /mcp` (which would open a
//! server-sent event stream) is refused.

use crate::tools::{self, ToolCall};
use aps::Aps;
use derive_more::Display;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tide::{Body, Request, Response, StatusCode};

/// Name under which this server introduces itself.
pub const SERVER_NAME: &str = "Autodesk ACC Agent";

/// Protocol version offered when the client does not ask for one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

pub type State = Arc<Aps>;

/// A JSON-RPC error object.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display(fmt = "{} ({})", message, code)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A single incoming JSON-RPC message.
///
/// Requests have a `method` and an `id`, notifications have a `method` but no `id`, and responses
/// (to requests we never send, but a client may still post them) have no `method`.
#[derive(Clone, Debug, Deserialize)]
struct Message {
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

pub fn app(aps: State) -> tide::Server<State> {
    let mut app = tide::with_state(aps);
    app.at("/mcp").post(post_message).get(|_| async {
        Ok(Response::builder(StatusCode::MethodNotAllowed)
            .header("Allow", "POST")
            .build())
    });
    app.at("/health").get(|_| async { Ok("ok") });
    app
}

async fn post_message(mut req: Request<State>) -> tide::Result {
    let body = req.body_bytes().await?;
    let msg = match parse_message(&body) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!("rejecting message: {err}");
            return reply(json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": err.code, "message": err.message },
            }));
        }
    };

    let (Some(method), Some(id)) = (msg.method, msg.id) else {
        return Ok(Response::new(StatusCode::Accepted));
    };
    tracing::info!(%id, "MCP request: {method}");
    let res = match handle(req.state(), &method, msg.params).await {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(err) => {
            tracing::warn!(%id, "{method} failed: {err}");
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": err.code, "message": err.message },
            })
        }
    };
    reply(res)
}

fn reply(body: Value) -> tide::Result {
    Ok(Response::builder(StatusCode::Ok)
        .body(Body::from_json(&body)?)
        .build())
}

fn parse_message(body: &[u8]) -> Result<Message, RpcError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| RpcError::new(PARSE_ERROR, format!("Parse error: {err}")))?;
    if value.is_array() {
        return Err(RpcError::new(
            INVALID_REQUEST,
            "Invalid Request: batches are not supported",
        ));
    }
    let msg: Message = serde_json::from_value(value)
        .map_err(|err| RpcError::new(INVALID_REQUEST, format!("Invalid Request: {err}")))?;
    if msg.jsonrpc != "2.0" {
        return Err(RpcError::new(
            INVALID_REQUEST,
            format!("Invalid Request: unsupported JSON-RPC version {}", msg.jsonrpc),
        ));
    }
    Ok(msg)
}

/// Answer a request.
async fn handle(aps: &Aps, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(initialize(&params)),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools::catalog() })),
        "tools/call" => {
            let call = ToolCall::from_params(params)?;
            Ok(call.run(aps).await.into_json())
        }
        _ => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )),
    }
}

fn initialize(params: &Value) -> Value {
    let version = params["protocolVersion"]
        .as_str()
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "Use find_project first to obtain a project_id, then pass it to the \
                         file, folder and user tools.",
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_message() {
        let msg = parse_message(br#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        assert_eq!(msg.id, Some(json!(7)));
        assert_eq!(msg.method.as_deref(), Some("ping"));
        assert_eq!(msg.params, Value::Null);

        let msg =
            parse_message(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert_eq!(msg.id, None);

        // A response to a server request.
        let msg = parse_message(br#"{"jsonrpc":"2.0","id":"a","result":{}}"#).unwrap();
        assert_eq!(msg.method, None);
    }

    #[test]
    fn test_malformed_messages() {
        assert_eq!(parse_message(b"{not json").unwrap_err().code, PARSE_ERROR);
        assert_eq!(
            parse_message(br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#)
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
        assert_eq!(
            parse_message(br#"{"id":1,"method":"ping"}"#)
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
        assert_eq!(
            parse_message(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#)
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
        assert_eq!(parse_message(b"42").unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_initialize() {
        let res = initialize(&json!({ "protocolVersion": "2024-11-05" }));
        assert_eq!(res["protocolVersion"], "2024-11-05");
        assert_eq!(res["serverInfo"]["name"], SERVER_NAME);
        assert!(res["capabilities"]["tools"].is_object());

        let res = initialize(&Value::Null);
        assert_eq!(res["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
    }
}
