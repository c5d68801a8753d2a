//! SSH command execution for the audit
//!
//! Runs every remote command through the system `ssh` client:
//! - Connection probe (`true`) under a connect timeout
//! - Command execution with timeout, child killed when abandoned
//! - ssh exit status 255 reported as a connection failure

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use cpuwatch_core::runner::{CommandOutput, CommandRunner, Connector};
use cpuwatch_core::{AuditError, Result};

use crate::config::SshConfig;

/// ssh's own exit status for connection-level errors
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Opens [`SshSession`]s for a fixed principal
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn CommandRunner>> {
        let session = SshSession {
            host: host.to_string(),
            config: self.config.clone(),
        };

        let probe = session
            .execute("true", self.config.connect_timeout + Duration::from_secs(1))
            .await
            .map_err(|e| match e {
                AuditError::RemoteExecutionFailed { reason, .. } => AuditError::connection(host, reason),
                other => other,
            })?;

        if !probe.success() {
            return Err(AuditError::connection(
                host,
                format!("probe exited with status {}: {}", probe.exit_status, probe.stdout.trim()),
            ));
        }

        debug!("Connected to {} as {}", host, self.config.user);
        Ok(Box::new(session))
    }
}

/// Command channel to one host
#[derive(Debug, Clone)]
pub struct SshSession {
    host: String,
    config: SshConfig,
}

impl SshSession {
    /// ssh arguments up to and including the destination
    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.config.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
        ];
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(format!("{}@{}", self.config.user, self.host));
        args
    }

    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let start_time = Instant::now();
        debug!("Executing on {}: {} (timeout: {:?})", self.host, command, timeout);

        let output = tokio::time::timeout(
            timeout,
            AsyncCommand::new("ssh")
                .args(self.ssh_args())
                .arg("--")
                .arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AuditError::remote(command, format!("timed out after {:?}", timeout)))?
        .map_err(|e| AuditError::remote(command, format!("failed to spawn ssh: {}", e)))?;

        let exit_status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        debug!(
            "{}: '{}' exited {} in {}ms",
            self.host,
            command,
            exit_status,
            start_time.elapsed().as_millis()
        );

        if exit_status == SSH_CONNECTION_FAILURE {
            return Err(AuditError::connection(&self.host, stderr.trim()));
        }

        if exit_status != 0 && !stderr.trim().is_empty() {
            debug!("{}: stderr: {}", self.host, stderr.trim());
        }

        Ok(CommandOutput::new(stdout, exit_status))
    }
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.execute(command, self.config.command_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SshSession {
        let config = SshConfig {
            user: "archy".to_string(),
            port: 2222,
            connect_timeout: Duration::from_secs(3),
            options: vec!["BatchMode=yes".to_string()],
            ..SshConfig::default()
        };
        SshSession {
            host: "TA-apne1-mm01".to_string(),
            config,
        }
    }

    #[test]
    fn test_ssh_args() {
        assert_eq!(
            session().ssh_args(),
            vec!["-p", "2222", "-o", "ConnectTimeout=3", "-o", "BatchMode=yes", "archy@TA-apne1-mm01"]
        );
    }

    #[test]
    fn test_sub_second_connect_timeout_rounds_up() {
        let mut s = session();
        s.config.connect_timeout = Duration::from_millis(200);
        assert!(s.ssh_args().contains(&"ConnectTimeout=1".to_string()));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_connection_error() {
        // .invalid never resolves; without an ssh binary the spawn error is a
        // connection error too
        let connector = SshConnector::new(SshConfig {
            connect_timeout: Duration::from_secs(2),
            ..SshConfig::default()
        });
        let err = connector.connect("cpuwatch-test.invalid").await.err().unwrap();
        assert!(err.is_connection(), "{:?}", err);
    }
}
