// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-based adapter for locally installed CLI agents.
//!
//! The adapter spawns the agent binary, appends a working-directory
//! flag and the prompt to its argument list, and translates the
//! newline-delimited JSON it writes to stdout into protocol events.
//! Lines that fail to decode become inline `error` events rather than
//! aborting the stream, so one malformed line never loses an agent's
//! remaining output.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Adapter;
use crate::error::AdapterError;
use crate::protocol::{self, ErrorPayload, Event, EventKind};

/// Flags that mark a working directory already present in the
/// configured argument list.
const WORKDIR_FLAGS: [&str; 3] = ["-w", "--worktree", "--workdir"];

/// Buffered events in flight per adapter.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Adapter that drives a CLI agent process and streams its stdout.
pub struct ProcessAdapter {
    /// Unique identifier for this agent instance.
    id: String,
    /// The binary to execute.
    command: String,
    /// Configured arguments, before worktree and prompt are appended.
    args: Vec<String>,
    /// Running child process, shared with the reader task.
    child: Arc<Mutex<Option<Child>>>,
}

impl ProcessAdapter {
    /// Creates a new process adapter.
    pub fn new(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args,
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns this adapter's agent id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Builds the full invocation argument list.
    ///
    /// Appends `-w <worktree>` unless a working-directory flag is
    /// already configured, then the prompt as the final argument.
    fn build_args(&self, worktree: &Path, prompt: &str) -> Vec<String> {
        let mut args = self.args.clone();

        let has_workdir = args.iter().any(|a| WORKDIR_FLAGS.contains(&a.as_str()));
        if !has_workdir {
            args.push("-w".to_string());
            args.push(worktree.to_string_lossy().into_owned());
        }

        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl Adapter for ProcessAdapter {
    async fn start(
        &self,
        cancel: CancellationToken,
        worktree: &Path,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Event>, AdapterError> {
        let args = self.build_args(worktree, prompt);
        debug!(agent_id = %self.id, command = %self.command, "spawning agent process");

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AdapterError::Spawn(format!("{}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Spawn("missing stdout pipe".to_string()))?;

        *self.child.lock().await = Some(child);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let id = self.id.clone();
        let handle = Arc::clone(&self.child);

        tokio::spawn(async move {
            read_events(id, stdout, tx, handle, cancel).await;
        });

        Ok(rx)
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            // The reader task reaps the process; killing it here just
            // ends the stream.
            let _ = child.start_kill();
        }
        Ok(())
    }
}

/// Reads the agent's stdout to completion, emitting one event per line
/// and closing the channel exactly once on return.
async fn read_events(
    id: String,
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<Event>,
    handle: Arc<Mutex<Option<Child>>>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut seq: u64 = 1;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Cancellation is expected: kill and reap quietly.
                reap(&handle, true).await;
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let event = match protocol::decode_line(&line) {
                        Ok(mut event) => {
                            if event.agent_id.is_empty() {
                                event.agent_id = id.clone();
                            }
                            if event.sequence_num == 0 {
                                event.sequence_num = seq;
                                seq += 1;
                            }
                            event
                        }
                        Err(e) => {
                            let event = error_event(
                                &id,
                                seq,
                                format!("failed to parse agent output: {e}"),
                                "parse_error",
                            );
                            seq += 1;
                            event
                        }
                    };

                    if tx.send(event).await.is_err() {
                        // Receiver dropped; nobody is listening anymore.
                        reap(&handle, true).await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let event = error_event(
                        &id,
                        seq,
                        format!("error reading agent stdout: {e}"),
                        "io_error",
                    );
                    let _ = tx.send(event).await;
                    break;
                }
            }
        }
    }

    // Stream ended: wait for the process and report a failure exit,
    // unless the run was cancelled (then a kill is expected).
    let status = reap(&handle, false).await;
    if !cancel.is_cancelled() {
        if let Some(status) = status {
            if !status.success() {
                let event = error_event(
                    &id,
                    seq,
                    format!("agent command failed: {status}"),
                    "command_error",
                );
                let _ = tx.send(event).await;
            }
        }
    }
}

/// Takes the child out of the shared handle and waits for it,
/// optionally killing it first.
async fn reap(handle: &Mutex<Option<Child>>, kill: bool) -> Option<std::process::ExitStatus> {
    let mut guard = handle.lock().await;
    let mut child = guard.take()?;
    if kill {
        let _ = child.start_kill();
    }
    child.wait().await.ok()
}

/// Builds a synthetic `error` event.
fn error_event(id: &str, seq: u64, message: String, code: &str) -> Event {
    let payload = ErrorPayload {
        message,
        code: code.to_string(),
    };
    match Event::new(EventKind::Error, id, seq).with_payload(&payload) {
        Ok(event) => event,
        Err(_) => Event::new(EventKind::Error, id, seq),
    }
}
