//! Error types for quay

use thiserror::Error;

/// Core error type for quay operations
#[derive(Error, Debug)]
pub enum QuayError {
    #[error("Project \"{0}\" not found")]
    ProjectNotFound(String),

    #[error("Package \"{0}\" not found")]
    PackageNotFound(String),

    #[error("Connection \"{0}\" not found")]
    ConnectionNotFound(String),

    #[error("Model \"{0}\" not found")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Package validation error: {0}")]
    PackageValidation(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("The server is running in frozen config mode; {0} is not allowed")]
    FrozenConfig(String),

    #[error("Package \"{0}\" is currently loading and can't be unloaded")]
    PackageLoading(String),

    #[error("Failed to update readme: {0}")]
    ReadmeUpdate(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Compilation error: {0}")]
    Compilation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

/// Coarse classification used at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Frozen,
    Conflict,
    Backend,
    Internal,
}

impl ErrorKind {
    /// HTTP status an API layer should answer with for this kind
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::Frozen => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::Backend => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl QuayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuayError::ProjectNotFound(_)
            | QuayError::PackageNotFound(_)
            | QuayError::ConnectionNotFound(_)
            | QuayError::ModelNotFound(_) => ErrorKind::NotFound,
            QuayError::Configuration(_)
            | QuayError::PackageValidation(_)
            | QuayError::AlreadyExists(_)
            | QuayError::BadRequest(_)
            | QuayError::Compilation(_)
            | QuayError::ReadmeUpdate(_) => ErrorKind::BadRequest,
            QuayError::FrozenConfig(_) => ErrorKind::Frozen,
            QuayError::PackageLoading(_) => ErrorKind::Conflict,
            QuayError::Connection(_) | QuayError::Query(_) | QuayError::Timeout(_) => {
                ErrorKind::Backend
            }
            QuayError::Io(_) | QuayError::Serialization(_) | QuayError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type alias for quay operations
pub type Result<T> = std::result::Result<T, QuayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::project(QuayError::ProjectNotFound("p".into()), 404)]
    #[case::model(QuayError::ModelNotFound("m.malloy".into()), 404)]
    #[case::config(QuayError::Configuration("missing host".into()), 400)]
    #[case::frozen(QuayError::FrozenConfig("deleting a package".into()), 403)]
    #[case::loading(QuayError::PackageLoading("q".into()), 409)]
    #[case::backend(QuayError::Connection("refused".into()), 502)]
    #[case::internal(QuayError::Internal("boom".into()), 500)]
    fn test_http_status_mapping(#[case] error: QuayError, #[case] status: u16) {
        assert_eq!(error.kind().http_status(), status);
    }

    #[test]
    fn test_messages_name_the_subject() {
        let err = QuayError::PackageLoading("sales".into());
        assert_eq!(
            err.to_string(),
            "Package \"sales\" is currently loading and can't be unloaded"
        );
        assert!(QuayError::PackageNotFound("x".into()).is_not_found());
        assert!(!QuayError::Timeout("x".into()).is_not_found());
    }
}
