// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire protocol spoken between the host and the guest agent running inside
//! a sandbox VM.
//!
//! Framing is length-prefixed JSON: a 4-byte big-endian length, then that
//! many bytes of UTF-8 JSON. No hypervisor is present in this environment,
//! so the transport is a UNIX domain socket standing in for the vsock device
//! the real guest agent would use; the framing and handshake are identical
//! either way.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Maximum size of a single framed message, host or guest direction.
pub const MAX_MESSAGE_BYTES: usize = 32 * 1024 * 1024;

/// Maximum size of a single output field before truncation.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error talking to guest agent: {0}")]
    Io(#[from] std::io::Error),
    #[error("guest agent handshake failed: expected 'OK {0}', got {1:?}")]
    HandshakeFailed(u32, String),
    #[error("message of {0} bytes exceeds the {1} byte frame limit")]
    MessageTooLarge(usize, usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// One request sent to the guest agent. `cell_id` threads through to the
/// response so callers can correlate async execution with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuestRequest {
    Python { code: String, cell_id: Option<String>, timeout_secs: u64 },
    Bash { command: String, cell_id: Option<String>, timeout_secs: u64 },
    WriteFile { path: String, content: String },
    ReadFile { path: String },
    WriteFileB { path: String, content_b64: String },
    ReadFileB { path: String },
    ListFiles { path: String },
    Install { packages: Vec<String> },
    GetState,
    Reset,
    Ping,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Text,
    Stderr,
    Error,
    Image,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl Output {
    pub fn text(content: impl Into<String>) -> Self {
        Self { kind: OutputKind::Text, content: content.into(), name: None, format: None, encoding: None }
    }

    pub fn image_png_base64(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Image,
            content: content.into(),
            name: None,
            format: Some("png".into()),
            encoding: Some("base64".into()),
        }
    }
}

/// Response to a [`GuestRequest`]. `output` mirrors the concatenated text
/// outputs for callers that only want the legacy flat stdout view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestResponse {
    pub success: bool,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl GuestResponse {
    /// Truncate text-bearing fields to [`MAX_OUTPUT_BYTES`], matching the
    /// guest agent's "truncate, don't fail" contract for oversized output.
    pub fn truncate_to_limit(mut self) -> Self {
        truncate_in_place(&mut self.output);
        truncate_in_place(&mut self.stderr);
        for out in &mut self.outputs {
            truncate_in_place(&mut out.content);
        }
        self
    }
}

fn truncate_in_place(s: &mut String) {
    if s.len() > MAX_OUTPUT_BYTES {
        s.truncate(MAX_OUTPUT_BYTES);
        s.push_str("\n...[truncated]");
    }
}

/// Connect to the guest's host-side socket and perform the `CONNECT`/`OK`
/// handshake for `vsock_port`.
pub async fn handshake(socket_path: &str, vsock_port: u32) -> Result<UnixStream, ProtocolError> {
    let mut stream = UnixStream::connect(socket_path).await?;
    stream.write_all(format!("CONNECT {vsock_port}\n").as_bytes()).await?;

    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 256 {
            break;
        }
    }
    let response = String::from_utf8_lossy(&line).to_string();
    if response != format!("OK {vsock_port}") {
        return Err(ProtocolError::HandshakeFailed(vsock_port, response));
    }
    Ok(stream)
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<T: Serialize>(stream: &mut UnixStream, value: &T) -> Result<(), ProtocolError> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::MessageTooLarge(body.len(), MAX_MESSAGE_BYTES));
    }
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub async fn read_frame<T: for<'de> Deserialize<'de>>(stream: &mut UnixStream) -> Result<T, ProtocolError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::MessageTooLarge(len, MAX_MESSAGE_BYTES));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Send a request and await its response, bounded by `timeout`.
pub async fn call(
    stream: &mut UnixStream,
    request: &GuestRequest,
    timeout: Duration,
) -> Result<GuestResponse, ProtocolError> {
    write_frame(stream, request).await?;
    tokio::time::timeout(timeout, read_frame::<GuestResponse>(stream))
        .await
        .map_err(|_| ProtocolError::Timeout(timeout))?
        .map(GuestResponse::truncate_to_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn handshake_succeeds_on_matching_ok_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"CONNECT 5005\n");
            stream.write_all(b"OK 5005\n").await.unwrap();
        });

        let path_str = path.to_str().unwrap().to_string();
        let _stream = handshake(&path_str, 5005).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_fails_on_mismatched_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"OK 9999\n").await.unwrap();
        });

        let path_str = path.to_str().unwrap().to_string();
        let err = handshake(&path_str, 5005).await.unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeFailed(5005, _)));
    }

    #[tokio::test]
    async fn frame_round_trips_a_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: GuestRequest = read_frame(&mut stream).await.unwrap();
            let resp = match req {
                GuestRequest::Ping => GuestResponse {
                    success: true,
                    outputs: vec![],
                    output: String::new(),
                    stderr: String::new(),
                    error: None,
                    execution_time: 0.0,
                    cell_id: None,
                    exit_code: None,
                },
                _ => panic!("unexpected request"),
            };
            write_frame(&mut stream, &resp).await.unwrap();
        });

        let mut client = UnixStream::connect(&path).await.unwrap();
        let resp = call(&mut client, &GuestRequest::Ping, Duration::from_secs(1)).await.unwrap();
        assert!(resp.success);
        server.await.unwrap();
    }

    #[test]
    fn oversized_output_is_truncated_not_failed() {
        let resp = GuestResponse {
            success: true,
            outputs: vec![],
            output: "x".repeat(MAX_OUTPUT_BYTES + 10),
            stderr: String::new(),
            error: None,
            execution_time: 0.0,
            cell_id: None,
            exit_code: None,
        }
        .truncate_to_limit();
        assert!(resp.output.len() < MAX_OUTPUT_BYTES + 10);
        assert!(resp.output.ends_with("[truncated]"));
    }

    #[test]
    fn request_serializes_with_snake_case_tag() {
        let req = GuestRequest::Python { code: "1+1".into(), cell_id: None, timeout_secs: 30 };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "python");
        assert_eq!(v["code"], "1+1");
    }
}
