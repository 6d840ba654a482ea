//! Optional external backends.
//!
//! The embedding model and the chat model may both be absent (no provider
//! configured, missing API key). Rather than scattering `Option` checks,
//! every consumer holds a [`Backend`] and matches on it; the
//! `Unconfigured` arm is where degraded behavior lives.

use thiserror::Error;

/// A backend that is either wired up or deliberately absent.
#[derive(Debug, Clone)]
pub enum Backend<T> {
    Unconfigured,
    Configured(T),
}

impl<T> Backend<T> {
    pub fn is_configured(&self) -> bool {
        matches!(self, Backend::Configured(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Backend::Configured(inner) => Some(inner),
            Backend::Unconfigured => None,
        }
    }
}

impl<T> From<Option<T>> for Backend<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => Backend::Configured(inner),
            None => Backend::Unconfigured,
        }
    }
}

/// Failure talking to an embedding or chat backend.
///
/// Every variant is recoverable: retrieval degrades to no results and
/// generation degrades to the extractive fallback.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend is not configured")]
    Unconfigured,

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend timed out after {0}s")]
    Timeout(u64),

    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}
