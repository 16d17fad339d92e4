// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container log relay.
//!
//! Follows a container's stdout and stderr and forwards each line to a
//! [`LogSink`], keyed by container ID. Relays run detached from the deploy
//! call and end when the stream ends (the container was removed) or the
//! application is cancelled.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lifetime::CancelToken;
use crate::runtime::{ContainerRuntime, FollowOptions, LogStream};

/// One relayed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Application ID.
    pub app_id: String,
    /// Container the line came from.
    pub container_id: String,
    /// Deployment that created the container.
    pub deployment_id: String,
    /// `stdout` or `stderr`.
    pub log_type: LogStream,
    /// Timestamp reported by the runtime, or receive time if absent.
    pub timestamp: DateTime<Utc>,
    /// Line content without the trailing newline.
    pub message: Vec<u8>,
}

/// Destination for relayed log lines.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Store one line.
    async fn write(&self, entry: LogEntry) -> Result<()>;
}

/// Sink that re-emits lines as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn write(&self, entry: LogEntry) -> Result<()> {
        info!(
            target: "launchpad_deployer::app_logs",
            app_id = %entry.app_id,
            container_id = %entry.container_id,
            stream = entry.log_type.as_str(),
            timestamp = %entry.timestamp.to_rfc3339(),
            "{}",
            String::from_utf8_lossy(&entry.message)
        );
        Ok(())
    }
}

/// Configuration for the log relay.
#[derive(Debug, Clone)]
pub struct LogRelayConfig {
    /// Lines of history to start from.
    pub tail_lines: usize,
}

impl Default for LogRelayConfig {
    fn default() -> Self {
        Self { tail_lines: 100 }
    }
}

/// Split a runtime-timestamped line into its timestamp and message.
///
/// Lines without a parseable RFC 3339 prefix are returned whole.
pub fn parse_line(line: &[u8]) -> (Option<DateTime<Utc>>, &[u8]) {
    let Some(space) = line.iter().position(|b| *b == b' ') else {
        return (None, line);
    };
    let parsed = std::str::from_utf8(&line[..space])
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    match parsed {
        Some(ts) => (Some(ts.with_timezone(&Utc)), &line[space + 1..]),
        None => (None, line),
    }
}

/// Reassembles lines from chunks per stream.
#[derive(Default)]
struct LineBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LineBuffer {
    fn buffer(&mut self, stream: LogStream) -> &mut Vec<u8> {
        match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        }
    }

    /// Append bytes and drain every completed line.
    fn push(&mut self, stream: LogStream, bytes: &[u8]) -> Vec<Vec<u8>> {
        let buf = self.buffer(stream);
        buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline) = buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = buf.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Remaining partial lines.
    fn flush(&mut self) -> Vec<(LogStream, Vec<u8>)> {
        [LogStream::Stdout, LogStream::Stderr]
            .into_iter()
            .filter_map(|stream| {
                let rest = std::mem::take(self.buffer(stream));
                (!rest.is_empty()).then_some((stream, rest))
            })
            .collect()
    }
}

/// What the relay is streaming.
#[derive(Debug, Clone)]
pub struct RelayTarget {
    /// Application ID.
    pub app_id: String,
    /// Deployment ID.
    pub deployment_id: String,
    /// Container ID.
    pub container_id: String,
}

/// Streams container output into a [`LogSink`].
pub struct LogRelay {
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn LogSink>,
    config: LogRelayConfig,
}

impl LogRelay {
    /// Create a new relay.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn LogSink>,
        config: LogRelayConfig,
    ) -> Self {
        Self {
            runtime,
            sink,
            config,
        }
    }

    /// Stream and persist until the stream ends or `cancel` fires.
    /// Returns the number of lines forwarded.
    pub async fn stream_and_persist(&self, target: &RelayTarget, mut cancel: CancelToken) -> u64 {
        let mut stream = self.runtime.follow_logs(
            &target.container_id,
            FollowOptions {
                tail: self.config.tail_lines,
                timestamps: true,
            },
        );
        let mut buffer = LineBuffer::default();
        let mut forwarded = 0u64;

        debug!(container_id = %target.container_id, "Log relay started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(container_id = %target.container_id, "Log relay cancelled");
                    break;
                }

                item = stream.next() => match item {
                    Some(Ok(chunk)) => {
                        for line in buffer.push(chunk.stream, &chunk.message) {
                            forwarded += self.forward(target, chunk.stream, &line).await;
                        }
                    }
                    Some(Err(e)) => {
                        if !e.is_not_found() {
                            warn!(container_id = %target.container_id, error = %e, "Log stream failed");
                        }
                        break;
                    }
                    None => break,
                }
            }
        }

        for (stream, rest) in buffer.flush() {
            forwarded += self.forward(target, stream, &rest).await;
        }

        info!(container_id = %target.container_id, lines = forwarded, "Log relay finished");
        forwarded
    }

    async fn forward(&self, target: &RelayTarget, stream: LogStream, line: &[u8]) -> u64 {
        let (timestamp, message) = parse_line(line);
        let entry = LogEntry {
            app_id: target.app_id.clone(),
            container_id: target.container_id.clone(),
            deployment_id: target.deployment_id.clone(),
            log_type: stream,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            message: message.to_vec(),
        };
        match self.sink.write(entry).await {
            Ok(()) => 1,
            Err(e) => {
                warn!(container_id = %target.container_id, error = %e, "Failed to persist log line");
                0
            }
        }
    }
}
