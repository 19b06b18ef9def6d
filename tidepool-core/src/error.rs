//! Tidepool error abstractions.

use thiserror::Error;

/// A result type where the error is an `AppError`.
pub type AppResult<T> = ::std::result::Result<T, AppError>;

/// The broad class of an error, used by callers to decide on retry behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// No write-eligible node or partition exists.
    CapacityExhausted,
    /// Connection acquire, send or receive failed at the transport level.
    Connectivity,
    /// Opcode, request ID or partition ID of a reply did not match its request.
    ProtocolMismatch,
    /// A CRC-32 mismatch was detected.
    Integrity,
    /// The caller supplied a malformed or foreign argument.
    InvalidArgument,
    /// The referenced resource is unknown.
    NotFound,
    /// The write path ran out of attempts, or every replica of a read failed.
    IoExhausted,
    /// An internal invariant was violated.
    Internal,
}

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// No write-eligible capacity is available.
    #[error("no write-eligible capacity is available")]
    CapacityExhausted,
    /// A transport level failure while talking to the given address.
    #[error("connectivity failure with host {addr}")]
    Connectivity {
        addr: String,
        #[source]
        source: anyhow::Error,
    },
    /// A reply did not belong to the request it answered.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
    /// A CRC-32 check failed.
    #[error("integrity failure: {0}")]
    Integrity(String),
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The referenced resource is not found.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// The write path exhausted its retry budget, or every writable partition failed.
    #[error("write failed after {attempts} attempts")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Option<Box<AppError>>,
    },
    /// Every replica of a partition failed to serve a read.
    #[error("all {} replicas of partition {partition_id} failed: [{}]", .causes.len(), render_causes(.causes))]
    ReplicasExhausted { partition_id: u64, causes: Vec<AppError> },
    /// The system has hit an internal error.
    #[error("internal error")]
    Ise(#[source] anyhow::Error),
}

impl AppError {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExhausted => ErrorKind::CapacityExhausted,
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::ProtocolMismatch(_) => ErrorKind::ProtocolMismatch,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::InvalidInput(_) => ErrorKind::InvalidArgument,
            Self::ResourceNotFound(_) => ErrorKind::NotFound,
            Self::RetryExhausted { .. } | Self::ReplicasExhausted { .. } => ErrorKind::IoExhausted,
            Self::Ise(_) => ErrorKind::Internal,
        }
    }

    /// Build a connectivity error for the given host.
    pub fn connectivity(addr: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Connectivity {
            addr: addr.into(),
            source: source.into(),
        }
    }

    /// True if the failure implicates the remote partition or replica, and the caller should
    /// move on to another one.
    pub fn is_remote_fault(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity | ErrorKind::ProtocolMismatch | ErrorKind::Integrity)
    }
}

fn render_causes(causes: &[AppError]) -> String {
    causes
        .iter()
        .map(|cause| DisplayChain(cause).to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Display an error along with its full chain of sources.
struct DisplayChain<'a>(&'a (dyn std::error::Error + 'static));

impl<'a> std::fmt::Display for DisplayChain<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {}", err)?;
            source = err.source();
        }
        Ok(())
    }
}
