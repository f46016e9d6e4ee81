use thiserror::Error;

// ======================================================
// RECORD KIND
// ======================================================

/// The two record kinds the external tools know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Container,
    Image,
}

impl RecordKind {
    /// Value accepted by the engine's `--type` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Container => "container",
            RecordKind::Image => "image",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ======================================================
// ENGINE ERRORS
// ======================================================

/// Errors surfaced while driving the container engine or the low-level runtime.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to run {binary}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} exited with status {status}")]
    CommandFailed { binary: String, status: i32 },

    #[error("unexpected output from {binary}")]
    Decode {
        binary: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("column {column} missing from the {table} listing")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    #[error("{kind} {name} does not exist")]
    NotFound { kind: RecordKind, name: String },

    #[error("container {name} does not exist, or is still running")]
    ContainerBusy { name: String },

    #[error("image {name} has dependent children")]
    ImageInUse { name: String },

    #[error("failed to remove {kind} {name}")]
    RemoveFailed { kind: RecordKind, name: String },
}
