//! A minimal leveled logger, consumed only by this crate's internals.
//!
//! Mirrors the `DbConn`/`DatabaseIf` split: a small trait for adapter
//! authors, and a cloneable handle wrapping a trait object so the schema
//! and every collection facade can share one sink.
//!
use std::fmt;
use std::sync::Arc;

/// Log levels, ordered `Debug < Info < Warn < Error < Silent`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Silent,
}

/// A logging sink for adapter authors to implement.
///
pub trait Logger: fmt::Debug {
    /// Write `message` at `level`, if the implementation's threshold
    /// admits it.
    ///
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// A leveled logger interface shared by the schema and its collections.
///
#[derive(Clone, Debug)]
pub struct LoggerIf(Arc<dyn Logger + Send + Sync>);

impl LoggerIf {
    /// Wrap `logger` in a shareable handle.
    ///
    pub fn new(logger: Arc<dyn Logger + Send + Sync>) -> Self {
        Self(logger)
    }

    /// A handle that discards everything.
    ///
    pub fn null() -> Self {
        Self::new(Arc::new(NullLogger))
    }

    pub fn log(&self, level: Level, message: &str) {
        self.0.log(level, message);
    }

    pub fn debug(&self, message: &str) {
        self.0.debug(message);
    }

    pub fn info(&self, message: &str) {
        self.0.info(message);
    }

    pub fn warn(&self, message: &str) {
        self.0.warn(message);
    }

    pub fn error(&self, message: &str) {
        self.0.error(message);
    }
}

impl Default for LoggerIf {
    fn default() -> Self {
        Self::null()
    }
}

/// A [`Logger`](trait.Logger.html) that discards everything. The default
/// when a schema is built without an explicit logger.
///
#[derive(Clone, Debug)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: Level, _message: &str) {}
}

/// A [`Logger`](trait.Logger.html) that writes to stderr, for tests and
/// examples. Messages below `threshold` are dropped.
///
#[derive(Clone, Debug)]
pub struct StderrLogger {
    pub threshold: Level,
}

impl StderrLogger {
    pub fn new(threshold: Level) -> Self {
        Self { threshold }
    }
}

impl Logger for StderrLogger {
    fn log(&self, level: Level, message: &str) {
        if level >= self.threshold {
            eprintln!("[{:?}] {}", level, message);
        }
    }
}
