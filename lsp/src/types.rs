//! Values that cross the hub boundary.
//!
//! Producers (whatever owns the language-server processes) send
//! [`ServerEvent`]s; the panel reads [`ServerStatus`] and
//! [`DiagnosticsSnapshot`] values through events and resources.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use bridge_events::InactiveRead;
use serde::Deserialize;

/// Hub construction parameters.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Known language servers, keyed by name (e.g. "lean").
    pub servers: HashMap<String, ServerConfig>,
    /// Policy for reading resources that have no getter while unobserved.
    pub inactive_read: InactiveRead,
}

/// One language server as declared in the config file.
///
/// The hub only routes by `file_extensions`. `command`, `args` and
/// `language_id` are carried for the process owner, which reads them back
/// through [`StatusHub::server_config`](crate::StatusHub::server_config).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command (e.g. "lake").
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// LSP language identifier (e.g. "lean4").
    pub language_id: String,
    /// File extensions this server handles, without the dot.
    #[serde(default)]
    pub file_extensions: Vec<String>,
}

/// Lifecycle state reported for a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Running,
    Stopped,
    Failed(String),
}

impl ServerState {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Payload of the hub's status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub server: String,
    pub state: ServerState,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            ServerState::Failed(reason) => write!(f, "{}: failed ({reason})", self.server),
            state => write!(f, "{}: {}", self.server, state.label()),
        }
    }
}

/// Input to the hub, sent by the process owner.
#[derive(Debug)]
pub enum ServerEvent {
    Status { server: String, state: ServerState },
    /// Full replacement of one file's diagnostics; empty clears the file.
    Diagnostics {
        path: PathBuf,
        items: Vec<Diagnostic>,
    },
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity. `None` outside 1..=4.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic. Line and column are 0-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    line: u32,
    col: u32,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: impl Into<String>,
        line: u32,
        col: u32,
        source: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            line,
            col,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `path:line:col: severity: [source] message`, 1-indexed.
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.line + 1,
            self.col + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// Immutable view of every file's diagnostics, error-bearing files first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    files: Vec<(PathBuf, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(PathBuf, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(PathBuf, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Diagnostics for one file, if it has any.
    #[must_use]
    pub fn for_path(&self, path: &Path) -> Option<&[Diagnostic]> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, items)| items.as_slice())
    }

    #[must_use]
    pub fn count(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Compact status-bar text like "E:3 W:5"; empty when there is nothing.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
