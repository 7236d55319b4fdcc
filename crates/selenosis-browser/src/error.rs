//! Browser controller error types

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("{0}")]
    Common(#[from] selenosis_common::Error),

    #[error("unmarshal selenosis.io/options: {0}")]
    InvalidOptions(#[source] serde_json::Error),

    #[error("missing namespace on Browser")]
    MissingNamespace,

    #[error("Browser has no UID")]
    MissingUid,
}

impl BrowserError {
    /// Whether requeueing the reconcile can fix this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Common(e) => e.is_retryable(),
            Self::InvalidOptions(_) | Self::MissingNamespace | Self::MissingUid => false,
        }
    }
}

impl From<kube::Error> for BrowserError {
    fn from(e: kube::Error) -> Self {
        Self::Common(e.into())
    }
}
