use std::time::Duration;
use thiserror::Error;

/// Failure of a single data source. Never fatal: the controller logs it and
/// leaves the affected snapshot fields stale.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("probe {probe} timed out after {after:?}")]
    Timeout { probe: &'static str, after: Duration },
    #[error("probe {probe} failed: {reason}")]
    Failed { probe: &'static str, reason: String },
    #[error("probe {probe} panicked: {reason}")]
    Panicked { probe: &'static str, reason: String },
}

impl ProbeError {
    pub fn failed(probe: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            probe,
            reason: reason.into(),
        }
    }

    pub fn probe(&self) -> &'static str {
        match self {
            Self::Timeout { probe, .. } | Self::Failed { probe, .. } | Self::Panicked { probe, .. } => {
                probe
            }
        }
    }

    /// Label used for the `kind` dimension of the collect error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "failure",
            Self::Panicked { .. } => "panic",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to build report client: {0}")]
    Client(reqwest::Error),
    #[error("report request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector answered with status {0}")]
    Status(reqwest::StatusCode),
}
