use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CrateError {
    #[error("missing required configuration key: {0}")]
    MissingConfigKey(String),

    #[error("invalid configuration value for {key}: {message}")]
    InvalidConfigValue { key: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse YAML config: {0}")]
    ConfigParse(String),

    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error("unresolved placeholder {{{token}}} in {value:?}")]
    UnresolvedPlaceholder { token: String, value: String },

    #[error("malformed placeholder in {0:?}")]
    MalformedPlaceholder(String),

    #[error("duplicate @id in metadata graph: {0}")]
    DuplicateNodeId(String),

    #[error("invalid metadata template: {0}")]
    InvalidTemplate(String),

    #[error("no metadata node matches manifest entry {0}")]
    UnlinkedManifestEntry(String),

    #[error("required file {entry} not found at {path}")]
    #[diagnostic(help("add the filename to `missing_files` if its absence is expected"))]
    MissingFile { entry: String, path: PathBuf },

    #[error("workflow configuration {0} not found")]
    #[diagnostic(help(
        "`run_parameter` must match the `-n` value given to run_wf.sh (e.g. `green` for green.yml)"
    ))]
    MissingWorkflowFile(PathBuf),

    #[error("manifest path {path} has {depth} segments (at most 3 allowed)")]
    PathTooDeep { path: String, depth: usize },

    #[error("run {0} not found in any run-information table")]
    RunNotFound(String),

    #[error("no {table} record for {key}")]
    RecordNotFound { table: String, key: String },

    #[error("ambiguous {table} records for {key}: {count} rows")]
    AmbiguousRecord {
        table: String,
        key: String,
        count: usize,
    },

    #[error("lookup table {source_name} is missing column {column}")]
    MissingColumn { source_name: String, column: String },

    #[error("lookup request failed: {0}")]
    LookupHttp(String),

    #[error("lookup source returned status {status}: {message}")]
    LookupStatus { status: u16, message: String },

    #[error("archive is broken: {archive} (renamed to {renamed_to})")]
    BrokenArchive { archive: PathBuf, renamed_to: PathBuf },

    #[error("no bzip2 codec found (need lbzip2 or bzip2 on PATH)")]
    MissingCodec,

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    MissingData,
    Lookup,
    Archive,
    ExternalTool,
    Filesystem,
}

impl CrateError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CrateError::MissingConfigKey(_)
            | CrateError::InvalidConfigValue { .. }
            | CrateError::ConfigRead(_)
            | CrateError::ConfigParse(_)
            | CrateError::InvalidRunId(_)
            | CrateError::UnresolvedPlaceholder { .. }
            | CrateError::MalformedPlaceholder(_)
            | CrateError::DuplicateNodeId(_)
            | CrateError::InvalidTemplate(_)
            | CrateError::UnlinkedManifestEntry(_) => ErrorCategory::Configuration,
            CrateError::MissingFile { .. }
            | CrateError::MissingWorkflowFile(_)
            | CrateError::PathTooDeep { .. } => ErrorCategory::MissingData,
            CrateError::RunNotFound(_)
            | CrateError::RecordNotFound { .. }
            | CrateError::AmbiguousRecord { .. }
            | CrateError::MissingColumn { .. }
            | CrateError::LookupHttp(_)
            | CrateError::LookupStatus { .. } => ErrorCategory::Lookup,
            CrateError::BrokenArchive { .. } | CrateError::MissingCodec => ErrorCategory::Archive,
            CrateError::MissingTool(_) | CrateError::ExternalTool { .. } => {
                ErrorCategory::ExternalTool
            }
            CrateError::Filesystem(_) => ErrorCategory::Filesystem,
        }
    }

    pub fn is_broken_archive(&self) -> bool {
        matches!(self, CrateError::BrokenArchive { .. })
    }
}
