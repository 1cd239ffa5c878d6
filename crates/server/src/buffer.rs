// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Bounded per-session scrollback buffers with disconnect-delta snapshots
//! and periodic persistence.
//!
//! Each buffer holds closed lines (no trailing newline) plus one open tail
//! line. When the cap is exceeded the oldest line is dropped and the
//! disconnect cursor re-anchors by the same amount. Appending past the cap
//! is the only data-loss path and is silent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::now_ms;
use crate::store::{BufferRecord, Store};

/// One session's scrollback.
#[derive(Debug)]
pub struct ScrollbackBuffer {
    lines: VecDeque<String>,
    /// Open tail line whose terminating newline has not been seen yet.
    tail: String,
    max_lines: usize,
    total_lines_written: u64,
    disconnect_index: Option<usize>,
    disconnect_at: Option<u64>,
    dirty: bool,
    last_flush_at: u64,
}

/// Reconnect payload extracted from a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSnapshot {
    pub session_id: String,
    pub output_since_disconnect: String,
    pub disconnect_time: Option<u64>,
    pub reconnect_time: u64,
}

/// Engine-wide totals across all buffers.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub buffers: usize,
    pub total_lines_written: u64,
    pub memory_bytes: usize,
}

/// Point-in-time buffer statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub lines: usize,
    pub max_lines: usize,
    pub percent_used: f64,
    pub total_lines_written: u64,
    pub memory_bytes: usize,
    pub last_flush_at: u64,
}

impl ScrollbackBuffer {
    fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            tail: String::new(),
            max_lines,
            total_lines_written: 0,
            disconnect_index: None,
            disconnect_at: None,
            dirty: false,
            last_flush_at: 0,
        }
    }

    /// Append raw output. Splits on `\n`; the first fragment extends the
    /// open tail, every full line closes into `lines`, and any trailing
    /// fragment becomes the new tail.
    fn append(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let mut parts = text.split('\n').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                // This fragment is terminated by a newline: close the line.
                self.tail.push_str(part);
                let line = std::mem::take(&mut self.tail);
                self.lines.push_back(line);
                self.total_lines_written += 1;
                if self.lines.len() > self.max_lines {
                    self.lines.pop_front();
                    if let Some(idx) = self.disconnect_index {
                        self.disconnect_index = Some(idx.saturating_sub(1));
                    }
                }
            } else {
                self.tail.push_str(part);
            }
        }
        self.dirty = true;
    }

    fn full(&self) -> String {
        let mut out = self.lines.iter().cloned().collect::<Vec<_>>().join("\n");
        if !self.tail.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.tail);
        }
        out
    }

    fn last_lines(&self, n: usize) -> String {
        let start = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(start).cloned().collect::<Vec<_>>().join("\n")
    }

    fn mark_disconnect(&mut self) {
        self.disconnect_index = Some(self.lines.len());
        self.disconnect_at = Some(now_ms());
    }

    fn clear_disconnect(&mut self) {
        self.disconnect_index = None;
        self.disconnect_at = None;
    }

    /// Extract the post-disconnect delta and clear the marker atomically.
    /// With no marker present the full buffer is returned.
    fn snapshot(&mut self, session_id: &str) -> BufferSnapshot {
        let output = match self.disconnect_index {
            Some(idx) => {
                let mut out = self
                    .lines
                    .iter()
                    .skip(idx)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                if !self.tail.is_empty() {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&self.tail);
                }
                out
            }
            None => self.full(),
        };
        let disconnect_time = self.disconnect_at;
        self.clear_disconnect();
        BufferSnapshot {
            session_id: session_id.to_owned(),
            output_since_disconnect: output,
            disconnect_time,
            reconnect_time: now_ms(),
        }
    }

    fn stats(&self) -> BufferStats {
        let memory_bytes =
            self.lines.iter().map(String::len).sum::<usize>() + self.tail.len();
        BufferStats {
            lines: self.lines.len(),
            max_lines: self.max_lines,
            percent_used: (self.lines.len() as f64 / self.max_lines as f64) * 100.0,
            total_lines_written: self.total_lines_written,
            memory_bytes,
            last_flush_at: self.last_flush_at,
        }
    }
}

/// Engine owning every session's buffer plus the periodic flush task.
pub struct BufferEngine {
    buffers: RwLock<HashMap<String, Arc<Mutex<ScrollbackBuffer>>>>,
    max_lines: usize,
    store: Option<Arc<Store>>,
    shutdown: CancellationToken,
}

impl BufferEngine {
    pub fn new(max_lines: usize, store: Option<Arc<Store>>) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_lines,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a buffer for the session. Idempotent: an existing buffer is
    /// preserved untouched.
    pub async fn create(&self, session_id: &str) {
        let mut buffers = self.buffers.write().await;
        buffers
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(ScrollbackBuffer::new(self.max_lines))));
    }

    async fn get(&self, session_id: &str) -> Option<Arc<Mutex<ScrollbackBuffer>>> {
        self.buffers.read().await.get(session_id).cloned()
    }

    pub async fn append(&self, session_id: &str, data: &[u8]) {
        match self.get(session_id).await {
            Some(buffer) => buffer.lock().await.append(data),
            None => warn!(session = session_id, "append to unknown buffer"),
        }
    }

    pub async fn get_full(&self, session_id: &str) -> Option<String> {
        let buffer = self.get(session_id).await?;
        let guard = buffer.lock().await;
        Some(guard.full())
    }

    pub async fn get_last_lines(&self, session_id: &str, n: usize) -> Option<String> {
        let buffer = self.get(session_id).await?;
        let guard = buffer.lock().await;
        Some(guard.last_lines(n))
    }

    pub async fn mark_disconnect(&self, session_id: &str) {
        if let Some(buffer) = self.get(session_id).await {
            buffer.lock().await.mark_disconnect();
        }
    }

    pub async fn clear_disconnect(&self, session_id: &str) {
        if let Some(buffer) = self.get(session_id).await {
            buffer.lock().await.clear_disconnect();
        }
    }

    pub async fn get_snapshot(&self, session_id: &str) -> Option<BufferSnapshot> {
        let buffer = self.get(session_id).await?;
        let mut guard = buffer.lock().await;
        Some(guard.snapshot(session_id))
    }

    pub async fn get_stats(&self, session_id: &str) -> Option<BufferStats> {
        let buffer = self.get(session_id).await?;
        let guard = buffer.lock().await;
        Some(guard.stats())
    }

    pub async fn delete_buffer(&self, session_id: &str) {
        self.buffers.write().await.remove(session_id);
    }

    /// Aggregate statistics across every buffer.
    pub async fn stats(&self) -> EngineStats {
        let handles: Vec<Arc<Mutex<ScrollbackBuffer>>> =
            self.buffers.read().await.values().cloned().collect();
        let mut stats = EngineStats { buffers: handles.len(), ..EngineStats::default() };
        for buffer in handles {
            let guard = buffer.lock().await;
            let per = guard.stats();
            stats.total_lines_written += per.total_lines_written;
            stats.memory_bytes += per.memory_bytes;
        }
        stats
    }

    /// Persist every buffer that changed since its last flush. Each session
    /// is written as one transaction; failures are logged and retried on the
    /// next tick.
    pub async fn flush(&self) {
        let Some(ref store) = self.store else {
            return;
        };
        let handles: Vec<(String, Arc<Mutex<ScrollbackBuffer>>)> = self
            .buffers
            .read()
            .await
            .iter()
            .map(|(id, buffer)| (id.clone(), Arc::clone(buffer)))
            .collect();

        for (session_id, buffer) in handles {
            let record = {
                let mut guard = buffer.lock().await;
                if !guard.dirty {
                    continue;
                }
                let record = BufferRecord {
                    session_id: session_id.clone(),
                    content: guard.full(),
                    total_lines: guard.total_lines_written,
                    last_flush_at: now_ms(),
                };
                guard.dirty = false;
                guard.last_flush_at = record.last_flush_at;
                record
            };
            if let Err(error) = store.save_buffer(&record).await {
                warn!(session = %session_id, %error, "buffer flush failed");
                if let Some(buffer) = self.get(&session_id).await {
                    buffer.lock().await.dirty = true;
                }
            }
        }
    }

    /// Flush a single session immediately (used on termination).
    pub async fn flush_session(&self, session_id: &str) {
        let Some(ref store) = self.store else {
            return;
        };
        let Some(buffer) = self.get(session_id).await else {
            return;
        };
        let record = {
            let mut guard = buffer.lock().await;
            let record = BufferRecord {
                session_id: session_id.to_owned(),
                content: guard.full(),
                total_lines: guard.total_lines_written,
                last_flush_at: now_ms(),
            };
            guard.dirty = false;
            guard.last_flush_at = record.last_flush_at;
            record
        };
        if let Err(error) = store.save_buffer(&record).await {
            warn!(session = session_id, %error, "buffer flush failed");
        }
    }

    /// Rehydrate a buffer from the store. Returns whether content was loaded.
    pub async fn load_buffer(&self, session_id: &str) -> anyhow::Result<bool> {
        let Some(ref store) = self.store else {
            return Ok(false);
        };
        let Some(record) = store.load_buffer(session_id).await? else {
            return Ok(false);
        };

        self.create(session_id).await;
        if let Some(buffer) = self.get(session_id).await {
            let mut guard = buffer.lock().await;
            if !record.content.is_empty() {
                guard.lines = record.content.split('\n').map(str::to_owned).collect();
            }
            while guard.lines.len() > guard.max_lines {
                guard.lines.pop_front();
            }
            guard.total_lines_written = record.total_lines;
            guard.last_flush_at = record.last_flush_at;
            guard.dirty = false;
        }
        Ok(true)
    }

    /// Spawn the periodic flush task. A zero interval disables it.
    pub fn spawn_flush_task(self: &Arc<Self>, interval_ms: u64) {
        if interval_ms == 0 || self.store.is_none() {
            return;
        }
        let engine = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        engine.flush().await;
                    }
                }
            }
            debug!("buffer flush task stopped");
        });
    }

    /// Cancel the flush task and discard all in-memory state. Does not
    /// implicitly flush. Idempotent.
    pub async fn destroy(&self) {
        self.shutdown.cancel();
        self.buffers.write().await.clear();
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
