//! Error types for the mesh-failover control plane

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// Invalid operator configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A registered cluster's kubeconfig could not be loaded
    #[error("Kubeconfig error for cluster {cluster}: {message}")]
    KubeconfigError { cluster: String, message: String },

    /// A cluster was referenced that has no KubernetesCluster registration
    #[error("Cluster {0} is not registered")]
    UnknownCluster(String),

    /// A collaborator could not serve the request
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Virtual IP allocation failed
    #[error("IP assignment failed on cluster {cluster}: {message}")]
    IpAssignmentError { cluster: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Several independent operations failed during one pass
    #[error("{0}")]
    Aggregate(MultiError),
}

impl Error {
    /// Whether a requeue with a short delay is likely to succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::BackendUnavailable(_)
            | Error::FinalizerError(_)
            | Error::IpAssignmentError { .. } => true,
            Error::Aggregate(errors) => errors.iter().any(Error::is_retriable),
            Error::ConfigError(_)
            | Error::KubeconfigError { .. }
            | Error::UnknownCluster(_)
            | Error::SerializationError(_) => false,
        }
    }
}

impl Error {
    /// Short category name used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::FinalizerError(_) => "finalizer",
            Error::ConfigError(_) => "config",
            Error::KubeconfigError { .. } => "kubeconfig",
            Error::UnknownCluster(_) => "unknown_cluster",
            Error::BackendUnavailable(_) => "backend",
            Error::IpAssignmentError { .. } => "ip_assignment",
            Error::SerializationError(_) => "serialization",
            Error::Aggregate(_) => "aggregate",
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as FinalizerError;
        match err {
            FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
            FinalizerError::AddFinalizer(e) | FinalizerError::RemoveFinalizer(e) => {
                Error::KubeError(e)
            }
            other => Error::FinalizerError(other.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Accumulates failures from independent operations.
///
/// Every write in a pass is attempted regardless of earlier failures;
/// the accumulated errors are flattened into a single [`Error`] at the end.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure. Nested aggregates are flattened.
    pub fn push(&mut self, error: Error) {
        match error {
            Error::Aggregate(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    /// Record the error of a result, if any.
    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing failed, otherwise a single aggregate error.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n\t* {}", error)?;
        }
        Ok(())
    }
}

impl FromIterator<Error> for MultiError {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        let mut errors = MultiError::new();
        for error in iter {
            errors.push(error);
        }
        errors
    }
}
