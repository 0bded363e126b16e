use thiserror::Error;

#[derive(Error, Debug)]
pub enum MkvmError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Remote operation '{operation}' failed: {details}")]
    RemoteOperation { operation: String, details: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Coarse classification of an [`MkvmError`], used for exit codes and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    RemoteOperation,
    Internal,
}

pub type Result<T> = std::result::Result<T, MkvmError>;
pub type MkvmResult<T> = std::result::Result<T, MkvmError>;

impl MkvmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        MkvmError::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        MkvmError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn remote(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        MkvmError::RemoteOperation {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MkvmError::Configuration { .. } | MkvmError::YamlError(_) => ErrorKind::Configuration,
            MkvmError::NotFound { .. } => ErrorKind::NotFound,
            MkvmError::RemoteOperation { .. } => ErrorKind::RemoteOperation,
            MkvmError::IoError(_) | MkvmError::JsonError(_) => ErrorKind::Internal,
        }
    }

    /// Process exit status for a run that failed with this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::RemoteOperation => 4,
            ErrorKind::Internal => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_exit_code() {
        let err = MkvmError::configuration("Unit X makes no sense");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "Configuration error: Unit X makes no sense");

        let err = MkvmError::not_found("datacenter 'dc1'");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.exit_code(), 3);

        let err = MkvmError::remote("PowerOnVM_Task", "host unreachable");
        assert_eq!(err.kind(), ErrorKind::RemoteOperation);
        assert_eq!(
            err.to_string(),
            "Remote operation 'PowerOnVM_Task' failed: host unreachable"
        );

        let err = MkvmError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.exit_code(), 1);
    }
}
