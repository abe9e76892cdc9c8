// src/error.rs
//! Error taxonomy shared by the fetcher, the source loaders and the orchestrator.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Flat classification of every failure the refresh core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Transport,
    HttpStatus,
    InvalidContent,
    InvalidShape,
    AlreadyRefreshing,
    TotalFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::InvalidContent => "invalid_content",
            ErrorKind::InvalidShape => "invalid_shape",
            ErrorKind::AlreadyRefreshing => "already_refreshing",
            ErrorKind::TotalFailure => "total_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single resilient fetch (after all attempts were spent).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },
    #[error("response is not valid JSON: {0}")]
    InvalidContent(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Transport(_) => ErrorKind::Transport,
            FetchError::HttpStatus { .. } => ErrorKind::HttpStatus,
            FetchError::InvalidContent(_) => ErrorKind::InvalidContent,
        }
    }
}

/// Failure of a source loader before its fallback strategy is consulted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("payload failed validation: {0}")]
    InvalidShape(String),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Fetch(e) => e.kind(),
            LoadError::InvalidShape(_) => ErrorKind::InvalidShape,
        }
    }
}

/// One failed source as reported by a total-failure cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub kind: ErrorKind,
    pub detail: String,
}

/// Errors that escape `RefreshOrchestrator::refresh*`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("a refresh cycle is already in progress")]
    AlreadyRefreshing,
    #[error("every source failed: {}", describe_failures(.failures))]
    TotalFailure { failures: Vec<SourceFailure> },
}

impl RefreshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefreshError::AlreadyRefreshing => ErrorKind::AlreadyRefreshing,
            RefreshError::TotalFailure { .. } => ErrorKind::TotalFailure,
        }
    }
}

fn describe_failures(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no sources were scheduled".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({}: {})", f.source, f.kind, f.detail))
        .collect::<Vec<_>>()
        .join(", ")
}
