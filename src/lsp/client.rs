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

//! JSON-RPC 2.0 client bound to one language-server child process.
//!
//! Concurrent requests are multiplexed by request id: a background reader
//! task parses `Content-Length` frames off the child's stdout and routes
//! each response to the oneshot waiting on its id. EOF or a malformed frame
//! marks the client dead; every pending waiter then fails fast.

use lsp_types::{
    ClientCapabilities, DidOpenTextDocumentParams, DocumentSymbolParams, DocumentSymbolResponse,
    GotoDefinitionParams, GotoDefinitionResponse, InitializeParams, InitializeResult,
    InitializedParams, Location, ReferenceParams, Uri, WorkspaceFolder,
};
use bytes::BytesMut;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, trace, warn};

use super::protocol::{self, NotificationMessage, RequestId, RequestMessage, ResponseMessage};
use crate::config::LaunchSpec;
use crate::error::LspError;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;

/// Manages communication with one LSP server process.
pub struct LspClient {
    language: String,
    next_id: AtomicI64,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
    pid: Option<u32>,
    initialization_options: Option<serde_json::Value>,
    _reader_handle: tokio::task::JoinHandle<()>,
    child: std::sync::Mutex<Child>,
}

impl LspClient {
    /// Spawns the server process from its launch spec and starts the
    /// response reader task.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Spawn`] if the executable cannot be started.
    pub fn spawn(
        language: &str,
        spec: &LaunchSpec,
        request_timeout: Duration,
    ) -> Result<Self, LspError> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| LspError::Spawn {
            command: spec.command.clone(),
            source: e,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| LspError::Protocol(
            "child stdin not captured".to_string(),
        ))?;
        let stdout = child.stdout.take().ok_or_else(|| LspError::Protocol(
            "child stdout not captured".to_string(),
        ))?;
        let pid = child.id();

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(Self::reader_task(
            stdin.clone(),
            stdout,
            pending.clone(),
            alive.clone(),
        ));

        debug!("spawned {} language server (pid {:?})", language, pid);

        Ok(Self {
            language: language.to_string(),
            next_id: AtomicI64::new(1),
            stdin,
            pending,
            alive,
            request_timeout,
            pid,
            initialization_options: spec.initialization_options.clone(),
            _reader_handle: reader_handle,
            child: std::sync::Mutex::new(child),
        })
    }

    /// Background task that reads frames and routes responses to waiters.
    async fn reader_task(
        stdin: Arc<Mutex<ChildStdin>>,
        stdout: ChildStdout,
        pending: PendingMap,
        alive: Arc<AtomicBool>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = BytesMut::with_capacity(8192);

        'read: loop {
            let mut temp = [0u8; 4096];
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!("LSP stdout closed");
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&temp[..n]);
                }
                Err(e) => {
                    error!("error reading from LSP stdout: {e}");
                    break;
                }
            }

            loop {
                let message_str = match protocol::try_parse_message(&mut buffer) {
                    Ok(Some(m)) => m,
                    Ok(None) => break,
                    Err(e) => {
                        error!("malformed LSP frame, dropping connection: {e}");
                        break 'read;
                    }
                };
                trace!("received LSP message: {message_str}");

                let value: serde_json::Value = match serde_json::from_str(&message_str) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("failed to parse LSP JSON: {e}");
                        continue;
                    }
                };

                if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
                    if let Some(id) = value.get("id") {
                        // Server → client request. We support none of them;
                        // answer MethodNotFound so the server can proceed.
                        debug!("rejecting server request: {method} (id: {id})");
                        let response = ResponseMessage {
                            jsonrpc: "2.0".to_string(),
                            id: Some(
                                serde_json::from_value(id.clone()).unwrap_or(RequestId::Number(0)),
                            ),
                            result: None,
                            error: Some(protocol::ResponseError {
                                code: -32601, // MethodNotFound
                                message: format!("Method '{method}' not supported by client"),
                                data: None,
                            }),
                        };
                        if let Ok(body) = serde_json::to_string(&response) {
                            let mut stdin_guard = stdin.lock().await;
                            if let Err(e) = write_frame(&mut stdin_guard, &body).await {
                                warn!("failed to answer server request: {e}");
                            }
                        }
                    } else {
                        // Notification. The pipeline pulls everything it
                        // needs via requests; progress and log chatter is
                        // only traced.
                        trace!("ignoring notification: {method}");
                    }
                } else if value.get("id").is_some() {
                    if let Ok(response) = serde_json::from_value::<ResponseMessage>(value)
                        && let Some(id) = &response.id
                    {
                        let mut pending = pending.lock().await;
                        if let Some(sender) = pending.remove(id) {
                            let _ = sender.send(response);
                        } else {
                            warn!("response for unknown request id: {id:?}");
                        }
                    }
                } else {
                    warn!("unknown message format: {message_str}");
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Wake every waiter; their oneshot senders drop here.
        pending.lock().await.clear();
        warn!("LSP reader task exiting - server connection lost");
    }

    /// Sends a request and awaits its response within the client deadline.
    ///
    /// # Errors
    ///
    /// [`LspError::Timeout`] past the deadline (a `$/cancelRequest` is sent
    /// best-effort), [`LspError::Protocol`] if the server dies mid-request,
    /// [`LspError::Server`] for JSON-RPC error responses.
    async fn request<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, LspError> {
        if !self.is_alive() {
            return Err(LspError::Protocol("server connection lost".to_string()));
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));

        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        self.send_message(&request).await?;

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(LspError::Protocol("server closed connection".to_string()));
            }
            Err(_) => {
                // Deadline passed: forget the request and tell the server.
                self.pending.lock().await.remove(&id);
                let _ = self.send_message(&protocol::cancel_notification(&id)).await;
                return Err(LspError::Timeout {
                    method: method.to_string(),
                    timeout: self.request_timeout,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(LspError::Server {
                code: error.code,
                message: error.message,
            });
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a notification (no response expected).
    async fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<(), LspError> {
        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        self.send_message(&notification).await
    }

    async fn send_message<T: serde::Serialize>(&self, message: &T) -> Result<(), LspError> {
        let body = serde_json::to_string(message)?;
        trace!("sending LSP message: {body}");
        let mut stdin = self.stdin.lock().await;
        write_frame(&mut stdin, &body).await
    }

    /// Performs the `initialize`/`initialized` handshake.
    ///
    /// # Errors
    ///
    /// Propagates request failures; an error here should count against the
    /// language's respawn budget.
    pub async fn initialize(&self, root: &Path) -> Result<InitializeResult, LspError> {
        let root_uri: Uri = format!("file://{}", root.display())
            .parse()
            .map_err(|e| LspError::Protocol(format!("invalid root path {root:?}: {e}")))?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            initialization_options: self.initialization_options.clone(),
            capabilities: ClientCapabilities::default(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "workspace".to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", params).await?;
        self.notify("initialized", InitializedParams {}).await?;
        Ok(result)
    }

    /// Sends `shutdown` then `exit`.
    ///
    /// # Errors
    ///
    /// Propagates request failures; callers escalate to signals.
    pub async fn shutdown(&self) -> Result<(), LspError> {
        // shutdown response varies by server (null, true, etc.) - ignore result
        let _: serde_json::Value = self.request("shutdown", serde_json::Value::Null).await?;
        self.notify("exit", serde_json::Value::Null).await?;
        Ok(())
    }

    /// Notifies the server that a document was opened.
    ///
    /// # Errors
    ///
    /// Fails if the notification cannot be written.
    pub async fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), LspError> {
        self.notify("textDocument/didOpen", params).await
    }

    /// Requests the document symbol outline for a file.
    ///
    /// # Errors
    ///
    /// See [`LspClient::request`].
    pub async fn document_symbols(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>, LspError> {
        self.request("textDocument/documentSymbol", params).await
    }

    /// Requests all references to a symbol position.
    ///
    /// # Errors
    ///
    /// See [`LspClient::request`].
    pub async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>, LspError> {
        self.request("textDocument/references", params).await
    }

    /// Requests implementation locations for a symbol position.
    ///
    /// # Errors
    ///
    /// See [`LspClient::request`].
    pub async fn implementation(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>, LspError> {
        self.request("textDocument/implementation", params).await
    }

    /// Sends `$/cancelRequest` for every in-flight request and forgets them.
    pub async fn cancel_pending(&self) {
        let ids: Vec<RequestId> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            let _ = self.send_message(&protocol::cancel_notification(&id)).await;
        }
    }

    /// True while the reader task still owns a live connection.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// The language this client serves.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// OS process id of the child, if it started.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Sends SIGTERM to the child. Shells out to `kill` so no unsafe
    /// syscall is needed.
    pub fn terminate(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let _ = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }

    /// SIGKILLs the child.
    pub fn force_kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.start_kill();
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

async fn write_frame(stdin: &mut ChildStdin, body: &str) -> Result<(), LspError> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    stdin.write_all(header.as_bytes()).await?;
    stdin.write_all(body.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}
