//! Built-in [`Runtime`] backed by a local pseudo-terminal per session.
//!
//! Grounded in the teacher's `daemon::session::PtySession` and
//! `daemon::buffer::RingBuffer`: each session gets its own PTY-hosted child
//! process, with a bounded ring buffer of recent output so `get_output` can
//! answer "last N lines" without re-reading the whole session history.

use crate::plugin::{Runtime, RuntimeHandle};
use crate::{OrchestratorError, Result};
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

/// Fixed-capacity byte ring buffer for PTY output history.
///
/// When full, new writes overwrite the oldest bytes. `read_all` returns
/// bytes in chronological order regardless of where the internal write
/// cursor currently sits.
pub struct RingBuffer {
    data: Vec<u8>,
    capacity: usize,
    write_pos: usize,
    total_written: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
            total_written: 0,
        }
    }

    pub fn write(&mut self, incoming: &[u8]) {
        if self.capacity == 0 || incoming.is_empty() {
            return;
        }

        // Only the trailing `capacity` bytes of a write larger than the
        // whole buffer can ever be observed.
        let incoming = if incoming.len() > self.capacity {
            &incoming[incoming.len() - self.capacity..]
        } else {
            incoming
        };

        if self.data.len() < self.capacity {
            self.data.resize(self.capacity, 0);
        }

        let mut pos = self.write_pos;
        for &byte in incoming {
            self.data[pos] = byte;
            pos = (pos + 1) % self.capacity;
        }
        self.write_pos = pos;
        self.total_written += incoming.len();
    }

    pub fn read_all(&self) -> Vec<u8> {
        if !self.has_wrapped() {
            return self.data[..self.len()].to_vec();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.data[self.write_pos..]);
        out.extend_from_slice(&self.data[..self.write_pos]);
        out
    }

    /// Returns the last `n` newline-delimited lines of buffered output.
    pub fn last_lines(&self, n: usize) -> String {
        let bytes = self.read_all();
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }

    pub fn len(&self) -> usize {
        std::cmp::min(self.total_written, self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }

    pub fn has_wrapped(&self) -> bool {
        self.total_written > self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.write_pos = 0;
        self.total_written = 0;
    }
}

const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

struct PtyHost {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    buffer: StdMutex<RingBuffer>,
}

/// Runtime implementation hosting each session in its own local PTY.
pub struct PtyRuntime {
    hosts: Mutex<HashMap<String, PtyHost>>,
}

impl PtyRuntime {
    pub fn new() -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn drain_available(host: &PtyHost) {
        let mut reader = match host.master.try_clone_reader() {
            Ok(r) => r,
            Err(_) => return,
        };
        let mut chunk = [0u8; 4096];
        // Readers from portable-pty block by default; callers only drain
        // after confirming output is pending via their own polling cadence,
        // so a single best-effort read is sufficient here.
        if let Ok(n) = reader.read(&mut chunk) {
            if n > 0 {
                host.buffer.lock().unwrap().write(&chunk[..n]);
            }
        }
    }
}

impl Default for PtyRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for PtyRuntime {
    fn name(&self) -> &'static str {
        "pty"
    }

    async fn create(
        &self,
        handle: &RuntimeHandle,
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<()> {
        let command = handle
            .data
            .get("command")
            .cloned()
            .ok_or_else(|| OrchestratorError::ConfigError("runtime handle missing 'command'".into()))?;
        let args: Vec<String> = handle
            .data
            .get("args")
            .map(|s| s.split(' ').filter(|a| !a.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let pty_system = native_pty_system();
        let size = PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| OrchestratorError::plugin(crate::plugin::PluginSlot::Runtime, PtyError(e.to_string())))?;

        let mut cmd = CommandBuilder::new(&command);
        cmd.args(&args);
        cmd.cwd(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| OrchestratorError::plugin(crate::plugin::PluginSlot::Runtime, PtyError(e.to_string())))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| OrchestratorError::plugin(crate::plugin::PluginSlot::Runtime, PtyError(e.to_string())))?;

        let host = PtyHost {
            master: pair.master,
            writer,
            child,
            buffer: StdMutex::new(RingBuffer::new(DEFAULT_BUFFER_CAPACITY)),
        };

        self.hosts.lock().await.insert(handle.id.clone(), host);
        Ok(())
    }

    async fn destroy(&self, handle: &RuntimeHandle) -> Result<()> {
        if let Some(mut host) = self.hosts.lock().await.remove(&handle.id) {
            let _ = host.child.kill();
        }
        Ok(())
    }

    async fn send_message(&self, handle: &RuntimeHandle, text: &str) -> Result<()> {
        let mut hosts = self.hosts.lock().await;
        let host = hosts
            .get_mut(&handle.id)
            .ok_or_else(|| OrchestratorError::NotFound(handle.id.clone()))?;
        host.writer
            .write_all(text.as_bytes())
            .map_err(|e| OrchestratorError::plugin(crate::plugin::PluginSlot::Runtime, e))?;
        host.writer
            .write_all(b"\n")
            .map_err(|e| OrchestratorError::plugin(crate::plugin::PluginSlot::Runtime, e))?;
        Ok(())
    }

    async fn get_output(&self, handle: &RuntimeHandle, lines: usize) -> Result<String> {
        let hosts = self.hosts.lock().await;
        let host = hosts
            .get(&handle.id)
            .ok_or_else(|| OrchestratorError::NotFound(handle.id.clone()))?;
        Self::drain_available(host);
        Ok(host.buffer.lock().unwrap().last_lines(lines))
    }

    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool> {
        let mut hosts = self.hosts.lock().await;
        let Some(host) = hosts.get_mut(&handle.id) else {
            return Ok(false);
        };
        match host.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(_)) => Ok(false),
            Err(e) => Err(OrchestratorError::plugin(crate::plugin::PluginSlot::Runtime, e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pty error: {0}")]
struct PtyError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_simple_write_read() {
        let mut buf = RingBuffer::new(100);
        buf.write(b"hello");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.read_all(), b"hello");
        assert!(!buf.has_wrapped());
    }

    #[test]
    fn ring_buffer_multiple_writes_stay_contiguous() {
        let mut buf = RingBuffer::new(100);
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.read_all(), b"hello world");
    }

    #[test]
    fn ring_buffer_wraparound_keeps_last_bytes_in_order() {
        let mut buf = RingBuffer::new(10);
        buf.write(b"12345678"); // 8 bytes
        buf.write(b"abcd"); // 4 more, wraps
        let result = buf.read_all();
        assert_eq!(result.len(), 10);
        assert!(buf.has_wrapped());
        assert_eq!(&result, b"345678abcd");
    }

    #[test]
    fn ring_buffer_large_write_keeps_only_tail() {
        let mut buf = RingBuffer::new(5);
        buf.write(b"this is way too long");
        let result = buf.read_all();
        assert_eq!(result, b" long");
    }

    #[test]
    fn ring_buffer_last_lines_returns_trailing_n() {
        let mut buf = RingBuffer::new(4096);
        buf.write(b"line1\nline2\nline3\nline4\n");
        assert_eq!(buf.last_lines(2), "line3\nline4");
    }
}
