//! Remote command seams.
//!
//! The core never knows how a command reaches a host. A [`Connector`] hands out
//! a [`CommandRunner`] per host; the binary backs both with ssh, tests back
//! them with scripted responses.

use async_trait::async_trait;

use crate::error::Result;

/// What a remote command printed and how it exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, exit_status: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Non-zero exit with nothing printed carries no information at all.
    pub fn is_usable(&self) -> bool {
        self.success() || !self.stdout.trim().is_empty()
    }
}

/// Runs commands on one already-connected host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Fails with `ConnectionError` or `RemoteExecutionFailed`.
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Acquires a [`CommandRunner`] for a host (the `Connecting` step).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn CommandRunner>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_output() {
        assert!(CommandOutput::new("", 0).is_usable());
        assert!(CommandOutput::new("cpu0 1 2 3 4\n", 1).is_usable());
        assert!(!CommandOutput::new("  \n", 2).is_usable());
        assert!(!CommandOutput::new("", 1).success());
    }
}
