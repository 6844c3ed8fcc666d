//! Run-scoped diagnostics.
//!
//! Every conversion run owns one [`RunLog`]. The join engine, the driver
//! resolver, the validation pipeline and the materializer all receive it as
//! `&mut RunLog` and push [`LogEntry`] / [`Progress`] events into it.
//! Listeners attached before the run are notified synchronously, in
//! emission order.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Log level for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Short grouping key, e.g. `orders.csv - Amount: Int32 Type Validation`
    pub category: String,
    /// Log message
    pub message: String,
}

impl LogEntry {
    pub fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, category, message)
    }

    pub fn success(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, category, message)
    }

    pub fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, category, message)
    }

    pub fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, category, message)
    }

    fn new(level: LogLevel, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            category: category.into(),
            message: message.into(),
        }
    }
}

/// Materialization progress: `current` of `total` fields processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    /// Completion in percent, `100.0` when there is nothing to do.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.current as f64 / self.total as f64 * 100.0
        }
    }
}

/// Receives log and progress events as they are emitted.
pub trait LogListener {
    fn on_entry(&mut self, entry: &LogEntry);

    fn on_progress(&mut self, _progress: Progress) {}
}

impl<F> LogListener for F
where
    F: FnMut(&LogEntry),
{
    fn on_entry(&mut self, entry: &LogEntry) {
        self(entry)
    }
}

/// Prints entries to stderr, one line each.
#[derive(Debug, Default)]
pub struct ConsoleListener {
    /// Also print info-level entries
    pub verbose: bool,
}

impl LogListener for ConsoleListener {
    fn on_entry(&mut self, entry: &LogEntry) {
        let prefix = match entry.level {
            LogLevel::Info if !self.verbose => return,
            LogLevel::Info => "   ",
            LogLevel::Success => "   ✓",
            LogLevel::Warning => "   ⚠️",
            LogLevel::Error => "   ❌",
        };
        eprintln!("{} [{}] {}", prefix, entry.category, entry.message);
    }
}

/// Collector for one conversion run.
pub struct RunLog {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    entries: Vec<LogEntry>,
    progress: Option<Progress>,
    listeners: Vec<Box<dyn LogListener>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            entries: Vec::new(),
            progress: None,
            listeners: Vec::new(),
        }
    }

    /// Attach a listener; it sees every event emitted after this call.
    pub fn subscribe(&mut self, listener: impl LogListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn log(&mut self, entry: LogEntry) {
        for listener in &mut self.listeners {
            listener.on_entry(&entry);
        }
        self.entries.push(entry);
    }

    pub fn info(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::info(category, message));
    }

    pub fn success(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::success(category, message));
    }

    pub fn warning(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::warning(category, message));
    }

    pub fn error(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::error(category, message));
    }

    /// Warning or error depending on `strict`.
    pub fn violation(&mut self, strict: bool, category: impl Into<String>, message: impl Into<String>) {
        if strict {
            self.error(category, message);
        } else {
            self.warning(category, message);
        }
    }

    pub fn report_progress(&mut self, current: usize, total: usize) {
        let progress = Progress { current, total };
        for listener in &mut self.listeners {
            listener.on_progress(progress);
        }
        self.progress = Some(progress);
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn last_progress(&self) -> Option<Progress> {
        self.progress
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn warning_count(&self) -> usize {
        self.count(LogLevel::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.count(LogLevel::Error)
    }

    /// Messages grouped by category, categories in first-seen order.
    pub fn by_category(&self) -> IndexMap<&str, Vec<&str>> {
        let mut grouped: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for entry in &self.entries {
            grouped
                .entry(entry.category.as_str())
                .or_default()
                .push(entry.message.as_str());
        }
        grouped
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .field("entries", &self.entries.len())
            .field("progress", &self.progress)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_listeners_see_entries_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut log = RunLog::new();
        log.subscribe(move |entry: &LogEntry| sink.borrow_mut().push(entry.message.clone()));

        log.info("Join", "first");
        log.warning("Join", "second");
        log.error("Mapping", "third");

        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn test_violation_level_follows_strict() {
        let mut log = RunLog::new();
        log.violation(true, "a", "strict");
        log.violation(false, "a", "lenient");

        assert_eq!(log.entries()[0].level, LogLevel::Error);
        assert_eq!(log.entries()[1].level, LogLevel::Warning);
        assert_eq!(log.error_count(), 1);
        assert_eq!(log.warning_count(), 1);
    }

    #[test]
    fn test_progress_reaches_listener() {
        struct Counter(Rc<RefCell<Vec<Progress>>>);

        impl LogListener for Counter {
            fn on_entry(&mut self, _entry: &LogEntry) {}

            fn on_progress(&mut self, progress: Progress) {
                self.0.borrow_mut().push(progress);
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut log = RunLog::new();
        log.subscribe(Counter(Rc::clone(&seen)));

        log.report_progress(1, 4);
        log.report_progress(2, 4);

        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(log.last_progress(), Some(Progress { current: 2, total: 4 }));
        assert_eq!(log.last_progress().unwrap().percent(), 50.0);
    }

    #[test]
    fn test_by_category_groups_messages() {
        let mut log = RunLog::new();
        log.warning("orders.csv - Amount: Missing Required Field", "row 1");
        log.info("Join", "processing");
        log.warning("orders.csv - Amount: Missing Required Field", "row 2");

        let grouped = log.by_category();
        let keys: Vec<_> = grouped.keys().copied().collect();
        assert_eq!(keys, vec!["orders.csv - Amount: Missing Required Field", "Join"]);
        assert_eq!(grouped["orders.csv - Amount: Missing Required Field"], vec!["row 1", "row 2"]);
    }

    #[test]
    fn test_runs_are_independent() {
        let mut first = RunLog::new();
        let second = RunLog::new();
        first.error("x", "y");

        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(second.entries().len(), 0);
    }
}
