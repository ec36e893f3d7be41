//! The server's event log.
//!
//! One tab-separated file per server run, `Logs/<yyyyMMdd_HHmmss>.csv`, with
//! the columns date, level, event id, IP, user, request type, payload and
//! message. Events below the runtime level are dropped. Every event written
//! is mirrored to `tracing`.

use crate::error::ServerError;
use bidi_protocol::types::{LogFile, LogLevel};
use bidi_protocol::RequestType;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER: &str = "Date\tLevel\tEventId\tIP\tUser\tRequestType\tPayload\tMessage\n";

/// Stable identifiers of logged events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogEventId {
    /// Server could not be started.
    C1,
    /// Handler failed while producing a response.
    C2,
    /// Handler returned without a response.
    C3,
    /// Accepting a connection failed.
    E1,
    /// Shutdown failed.
    E2,
    /// Identity could not be received.
    E3,
    /// Key agreement failed.
    E4,
    /// Request could not be received or carried a wrong token.
    E5,
    /// Response could not be sent.
    E6,
    /// Notification channel failed.
    E7,
    /// Request answered.
    I1,
    /// Server started.
    G1,
    /// Server shut down.
    G2,
    /// Unknown user.
    W1,
    /// Inactive user.
    W2,
    /// Incompatible client build.
    V1,
    /// Written by the application.
    Custom,
}

impl LogEventId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEventId::C1 => "C1",
            LogEventId::C2 => "C2",
            LogEventId::C3 => "C3",
            LogEventId::E1 => "E1",
            LogEventId::E2 => "E2",
            LogEventId::E3 => "E3",
            LogEventId::E4 => "E4",
            LogEventId::E5 => "E5",
            LogEventId::E6 => "E6",
            LogEventId::E7 => "E7",
            LogEventId::I1 => "I1",
            LogEventId::G1 => "G1",
            LogEventId::G2 => "G2",
            LogEventId::W1 => "W1",
            LogEventId::W2 => "W2",
            LogEventId::V1 => "V1",
            LogEventId::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for LogEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub event_id: LogEventId,
    pub level: LogLevel,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub request_type: Option<RequestType>,
    pub payload: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(event_id: LogEventId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            event_id,
            level,
            ip: None,
            user_id: None,
            request_type: None,
            payload: None,
            message: message.into(),
        }
    }

    pub fn ip(mut self, ip: impl ToString) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn request(mut self, request_type: RequestType) -> Self {
        self.request_type = Some(request_type);
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    fn to_line(&self, date: &str) -> String {
        // Tabs and newlines inside fields would break the columns
        let clean = |s: &str| s.replace(['\t', '\n', '\r'], " ");
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            date,
            self.level,
            self.event_id,
            self.ip.as_deref().map(clean).unwrap_or_default(),
            self.user_id.as_deref().map(clean).unwrap_or_default(),
            self.request_type.map(|t| t.as_str()).unwrap_or_default(),
            self.payload.as_deref().map(clean).unwrap_or_default(),
            clean(&self.message),
        )
    }
}

pub struct EventLog {
    path: PathBuf,
    level: RwLock<LogLevel>,
    write_lock: Mutex<()>,
}

impl EventLog {
    /// Starts a new log file in `logs_dir`.
    pub fn create(logs_dir: impl AsRef<Path>, level: LogLevel) -> Result<Self, ServerError> {
        let logs_dir = logs_dir.as_ref();
        std::fs::create_dir_all(logs_dir)?;
        let name = format!("{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let path = logs_dir.join(name);

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(HEADER.as_bytes())?;
        }

        tracing::debug!("Event log at {}", path.display());

        Ok(Self {
            path,
            level: RwLock::new(level),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn level(&self) -> LogLevel {
        *self.level.read()
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.level.write() = level;
    }

    /// Shorthand for events without connection context.
    pub fn message(&self, event_id: LogEventId, level: LogLevel, message: impl Into<String>) {
        self.log(LogEntry::new(event_id, level, message));
    }

    pub fn log(&self, entry: LogEntry) {
        if entry.level < self.level() {
            return;
        }

        mirror(&entry);

        let date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = entry.to_line(&date);

        let _guard = self.write_lock.lock();
        let result = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }

    /// Name and content of the current log file.
    pub fn get_log(&self) -> Result<LogFile, ServerError> {
        let _guard = self.write_lock.lock();
        let content = std::fs::read_to_string(&self.path)?;
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(LogFile { file_name, content })
    }

    /// Size of the current log file in bytes, 0 if it is gone.
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

fn mirror(entry: &LogEntry) {
    let ip = entry.ip.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Verbose => {
            tracing::debug!("[{}] {} {}", ip, entry.event_id, entry.message)
        }
        LogLevel::Information | LogLevel::General => {
            tracing::info!("[{}] {} {}", ip, entry.event_id, entry.message)
        }
        LogLevel::Warning => tracing::warn!("[{}] {} {}", ip, entry.event_id, entry.message),
        LogLevel::Error | LogLevel::Critical => {
            tracing::error!("[{}] {} {}", ip, entry.event_id, entry.message)
        }
    }
}
