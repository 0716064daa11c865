use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notification sent to log subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(String),
    Cleared,
}

/// Append-only, size-bounded log shared between output readers and observers.
///
/// Once `capacity` lines are held, every push drops the oldest line. Cloning
/// yields another handle to the same buffer.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    events: broadcast::Sender<LogEvent>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
                events,
            }),
        }
    }

    fn lines(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.inner.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        let mut lines = self.lines();
        while lines.len() >= self.inner.capacity {
            lines.pop_front();
        }
        lines.push_back(line.clone());
        // Sent under the lock so subscribers see events in buffer order.
        let _ = self.inner.events.send(LogEvent::Line(line));
    }

    /// Drop every line. Lines pushed afterwards are kept as usual.
    pub fn clear(&self) {
        let mut lines = self.lines();
        lines.clear();
        let _ = self.inner.events.send(LogEvent::Cleared);
    }

    /// Point-in-time copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Receive every line pushed and every clear from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.events.subscribe()
    }
}
