//! Error taxonomy shared by every stage of a host audit.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    /// Bad CPU range syntax (`"2-x"`, `"5-2"`, `"abc"`).
    #[error("malformed cpu list token '{token}'")]
    MalformedExpression { token: String },

    /// A `/proc/stat` cpuN line that cannot be turned into counters.
    #[error("malformed counter line '{line}': {reason}")]
    MalformedCounterLine { line: String, reason: String },

    #[error("remote command '{command}' failed: {reason}")]
    RemoteExecutionFailed { command: String, reason: String },

    #[error("connection to {host} failed: {reason}")]
    ConnectionError { host: String, reason: String },

    /// Command ran fine but printed something we cannot interpret.
    #[error("unexpected output from '{command}': {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("audit cancelled")]
    Cancelled,
}

impl AuditError {
    pub fn remote(command: impl Into<String>, reason: impl ToString) -> Self {
        AuditError::RemoteExecutionFailed {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    pub fn connection(host: impl Into<String>, reason: impl ToString) -> Self {
        AuditError::ConnectionError {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    /// Connection failures are the only ones worth retrying.
    pub fn is_connection(&self) -> bool {
        matches!(self, AuditError::ConnectionError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AuditError::MalformedExpression { token: "abc".into() };
        assert_eq!(err.to_string(), "malformed cpu list token 'abc'");

        let err = AuditError::connection("ta-apne1-01", "timed out");
        assert!(err.is_connection());
        assert_eq!(err.to_string(), "connection to ta-apne1-01 failed: timed out");

        assert!(!AuditError::remote("nproc", "exit 1").is_connection());
    }
}
