//! Bounded in-memory log ring backing the `/logs` endpoint.
//!
//! Operational lines go through `tracing` as usual; this ring additionally
//! keeps the most recent entries so an operator can read them over HTTP
//! without shell access to the host.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::info;

pub const DEFAULT_CAPACITY: usize = 200;

pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends a timestamped line, evicting the oldest past capacity.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        let line = format!("{}  {}", chrono::Utc::now().to_rfc3339(), message);
        let mut lines = self.lines.lock().unwrap();
        lines.push_back(line);
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// Up to `amount` most recent lines, oldest first.
    pub fn tail(&self, amount: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        let skip = lines.len().saturating_sub(amount);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
