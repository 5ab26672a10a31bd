use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};

use super::messages::{Request, Response, RpcError};

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: Value,
}

/// JSON-RPC 2.0 success response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Response,
    pub id: Value,
}

/// JSON-RPC 2.0 error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: Value,
}

impl RpcRequest {
    pub fn new(request: Request, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            request,
            id: id.into(),
        }
    }
}

impl RpcResponse {
    pub fn new(result: Response, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }
}

impl RpcErrorResponse {
    pub fn new(error: RpcError, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error,
            id,
        }
    }
}

fn invalid_data(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Write a message as a single line (JSONL)
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let json = serde_json::to_string(msg).map_err(invalid_data)?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

/// Write an already-serialized payload as one line.
pub fn write_line<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one line and decode it; `None` at EOF.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> io::Result<Option<T>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    serde_json::from_str(&line).map(Some).map_err(invalid_data)
}

/// Read a JSON-RPC request from a line
pub fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<RpcRequest>> {
    read_message(reader)
}

/// Read a JSON-RPC response (success or error) from a line
pub fn read_response<R: BufRead>(
    reader: &mut R,
) -> io::Result<Result<RpcResponse, RpcErrorResponse>> {
    let line: Value = read_message(reader)?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")
    })?;

    if line.get("error").is_some() {
        return serde_json::from_value(line).map(Err).map_err(invalid_data);
    }
    serde_json::from_value(line).map(Ok).map_err(invalid_data)
}
