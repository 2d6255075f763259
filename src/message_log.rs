//! Shared operator-message sink.
//!
//! Components receive a `MessageLog` handle at construction instead of
//! talking to a process-global buffer. Every message forwards to the `log`
//! facade; info and above are also retained in a bounded ring for the
//! overlay message panel, appended to the text log file when one is open,
//! and wake the overlay notifier so the panel redraws.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use log::Level;
use parking_lot::Mutex;

use crate::error::Result;
use crate::events::OverlayNotifier;
use crate::protocol::wall_time;

/// One captured message.
#[derive(Debug, Clone)]
pub struct MessageEntry {
    /// Capture time, epoch seconds
    pub time: f64,
    pub level: Level,
    /// Component name, e.g. `control` or `srv.robot`
    pub origin: String,
    pub text: String,
}

impl MessageEntry {
    /// Panel line: `HH:MM:SS.mmm [L] origin: text`.
    pub fn panel_line(&self) -> String {
        format!(
            "{} [{}] {}: {}",
            format_clock(self.time),
            level_letter(self.level),
            self.origin,
            self.text
        )
    }
}

struct Inner {
    entries: VecDeque<MessageEntry>,
    capacity: usize,
    file: Option<File>,
    notifier: Option<OverlayNotifier>,
}

/// Bounded ring of recent operator-facing messages. Clones share one ring.
#[derive(Clone)]
pub struct MessageLog {
    inner: Arc<Mutex<Inner>>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                file: None,
                notifier: None,
            })),
        }
    }

    /// Append formatted copies of every message to the given text log file.
    pub fn attach_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.inner.lock().file = Some(file);
        Ok(())
    }

    /// Wake this notifier whenever a message lands in the ring.
    pub fn set_notifier(&self, notifier: OverlayNotifier) {
        self.inner.lock().notifier = Some(notifier);
    }

    pub fn error(&self, origin: &str, text: String) {
        self.push(Level::Error, origin, text);
    }

    pub fn warn(&self, origin: &str, text: String) {
        self.push(Level::Warn, origin, text);
    }

    pub fn info(&self, origin: &str, text: String) {
        self.push(Level::Info, origin, text);
    }

    /// Debug messages forward to the `log` facade only; the panel does not
    /// show them.
    pub fn debug(&self, origin: &str, text: String) {
        self.push(Level::Debug, origin, text);
    }

    pub fn push(&self, level: Level, origin: &str, text: String) {
        log::log!(target: origin, level, "{}", text);

        let entry = MessageEntry {
            time: wall_time(),
            level,
            origin: origin.to_string(),
            text,
        };

        let mut inner = self.inner.lock();
        if let Some(file) = inner.file.as_mut() {
            writeln!(
                file,
                "{} [{}] {}: {}",
                Local::now().format("%F %T%.3f"),
                level_letter(entry.level),
                entry.origin,
                entry.text
            )
            .ok();
        }
        if level > Level::Info {
            return;
        }
        inner.entries.push_back(entry);
        while inner.entries.len() > inner.capacity {
            inner.entries.pop_front();
        }
        if let Some(notifier) = &inner.notifier {
            notifier.request();
        }
    }

    /// Panel lines, oldest first.
    pub fn panel_lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(MessageEntry::panel_line)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop all retained entries, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        dropped
    }
}

fn level_letter(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    }
}

fn format_clock(epoch: f64) -> String {
    let secs = epoch.floor() as i64;
    let nanos = ((epoch - secs as f64) * 1e9) as u32;
    match Local.timestamp_opt(secs, nanos).single() {
        Some(t) => t.format("%H:%M:%S%.3f").to_string(),
        None => format!("{:.3}", epoch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_capacity() {
        let log = MessageLog::new(3);
        for i in 0..5 {
            log.info("test", format!("message {}", i));
        }
        let lines = log.panel_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("message 2"));
        assert!(lines[2].ends_with("message 4"));
    }

    #[test]
    fn test_debug_not_retained() {
        let log = MessageLog::new(8);
        log.debug("test", "hidden".to_string());
        log.info("test", "shown".to_string());
        assert_eq!(log.len(), 1);
        assert!(log.panel_lines()[0].contains("[I] test: shown"));
    }

    #[test]
    fn test_clear_reports_count() {
        let log = MessageLog::new(8);
        log.info("test", "one".to_string());
        log.warn("test", "two".to_string());
        assert_eq!(log.clear(), 2);
        assert!(log.is_empty());
        assert_eq!(log.clear(), 0);
    }

    #[test]
    fn test_file_append() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("station.log");
        let log = MessageLog::new(8);
        log.attach_file(&path).unwrap();
        log.info("control", "connected".to_string());
        log.debug("control", "details".to_string());
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[I] control: connected"));
        assert!(lines[1].contains("[D] control: details"));
    }
}
