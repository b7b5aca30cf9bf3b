/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-RPC 2.0 message types and `Content-Length` framing for the LSP wire.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::LspError;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// A JSON-RPC request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id, echoed by the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Parameters (JSON `null` when absent).
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The id of the request this answers (`None` for protocol-level errors).
    pub id: Option<RequestId>,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A JSON-RPC notification (no id, no response).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Parameters (JSON `null` when absent).
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// Request ids may be numbers or strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

/// A JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Builds the `$/cancelRequest` notification for an in-flight request.
#[must_use]
pub fn cancel_notification(id: &RequestId) -> NotificationMessage {
    NotificationMessage {
        jsonrpc: "2.0".to_string(),
        method: "$/cancelRequest".to_string(),
        params: serde_json::json!({ "id": id }),
    }
}

/// Parses one `Content-Length`-framed message from the front of `buffer`,
/// if a complete one has arrived.
///
/// # Errors
///
/// Returns [`LspError::Protocol`] for malformed headers or non-UTF-8
/// payloads; the caller should consider the stream dead.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>, LspError> {
    // A frame is header block, blank line, then exactly Content-Length
    // bytes of JSON. Until the blank line shows up there is nothing to do.
    let Some(body_start) = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|at| at + 4)
    else {
        return Ok(None);
    };

    let body_len = content_length(&buffer[..body_start - 4])?;
    if buffer.len() < body_start + body_len {
        return Ok(None);
    }

    buffer.advance(body_start);
    let body = buffer.split_to(body_len);
    String::from_utf8(body.to_vec())
        .map(Some)
        .map_err(|e| LspError::Protocol(format!("non-UTF-8 payload: {e}")))
}

/// Extracts the `Content-Length` value from a raw header block. The header
/// name is case-insensitive per the LSP base protocol.
fn content_length(header_block: &[u8]) -> Result<usize, LspError> {
    let text = std::str::from_utf8(header_block)
        .map_err(|e| LspError::Protocol(format!("non-UTF-8 headers: {e}")))?;

    for field in text.split("\r\n") {
        let Some((name, value)) = field.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse()
                .map_err(|e| LspError::Protocol(format!("bad Content-Length: {e}")));
        }
    }

    Err(LspError::Protocol("missing Content-Length header".to_string()))
}
