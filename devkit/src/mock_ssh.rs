/*!
Connecteur SSH simulé pour tester sans serveur distant

Chaque hôte simulé répond aux commandes du sampler (isolation, nproc,
/proc/stat) avec des sorties scriptées. Toutes les commandes exécutées et
toutes les tentatives de connexion sont enregistrées pour les assertions.
*/

use async_trait::async_trait;
use cpuwatch_core::runner::{CommandOutput, CommandRunner, Connector};
use cpuwatch_core::sampler::{CPU_COUNT_COMMAND, ISOLATION_COMMAND};
use cpuwatch_core::stat::STAT_COMMAND;
use cpuwatch_core::{AuditError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Comportement d'un hôte simulé
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    /// Sortie de la commande d'isolation ("" = pas d'isolation)
    pub isolation: String,
    /// Sortie de `nproc`
    pub nproc: String,
    /// Lectures successives de /proc/stat (la dernière est répétée)
    pub stats: VecDeque<String>,
    /// Nombre de connexions refusées avant d'accepter (None = toujours refusée)
    pub refuse_connections: Option<u32>,
    pub unreachable: bool,
    /// Les commandes ne rendent jamais la main (tests d'annulation)
    pub hang: bool,
    /// Réponses forcées pour une commande donnée
    pub overrides: HashMap<String, std::result::Result<CommandOutput, AuditError>>,
}

impl MockHost {
    /// Hôte sans isolation avec `cpus` CPUs
    pub fn with_cpus(cpus: u32) -> Self {
        Self {
            nproc: format!("{}\n", cpus),
            ..Default::default()
        }
    }

    /// Hôte avec une expression isolcpus
    pub fn isolated(expr: &str, cpus: u32) -> Self {
        Self {
            isolation: format!("{}\n", expr),
            ..Self::with_cpus(cpus)
        }
    }

    /// Hôte injoignable (ConnectionError à chaque tentative)
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    pub fn with_stats(mut self, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.stats = VecDeque::from(vec![first.into(), second.into()]);
        self
    }

    pub fn refusing(mut self, attempts: u32) -> Self {
        self.refuse_connections = Some(attempts);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_override(mut self, command: &str, response: std::result::Result<CommandOutput, AuditError>) -> Self {
        self.overrides.insert(command.to_string(), response);
        self
    }
}

/// Commande exécutée sur un hôte simulé
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub host: String,
    pub command: String,
}

#[derive(Debug, Default)]
struct MockState {
    hosts: HashMap<String, MockHost>,
    executed: Vec<ExecutedCommand>,
    connect_attempts: HashMap<String, u32>,
}

/// Mock Connector qui simule le transport SSH
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre (ou remplace) un hôte simulé
    pub fn add_host(&self, name: &str, host: MockHost) -> &Self {
        self.state.lock().hosts.insert(name.to_string(), host);
        self
    }

    /// Toutes les commandes exécutées (pour assertions de tests)
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.state.lock().executed.clone()
    }

    /// Commandes exécutées sur un hôte donné, dans l'ordre
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn connect_attempts(&self, host: &str) -> u32 {
        self.state.lock().connect_attempts.get(host).copied().unwrap_or(0)
    }

    /// Reset des enregistrements (les hôtes restent configurés)
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.executed.clear();
        state.connect_attempts.clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn CommandRunner>> {
        let mut state = self.state.lock();
        let attempts = {
            let counter = state.connect_attempts.entry(host.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let Some(mock) = state.hosts.get(host) else {
            log::info!("🔌 [MOCK] Unknown host {}", host);
            return Err(AuditError::connection(host, "Could not resolve hostname"));
        };

        let refused = mock.unreachable
            || matches!(mock.refuse_connections, Some(limit) if attempts <= limit);
        if refused {
            log::info!("🔌 [MOCK] Connection refused by {} (attempt {})", host, attempts);
            return Err(AuditError::connection(host, "Connection refused"));
        }

        log::info!("🔌 [MOCK] Connected to {}", host);
        Ok(Box::new(MockSession {
            host: host.to_string(),
            state: self.state.clone(),
        }))
    }
}

/// Session ouverte sur un hôte simulé
pub struct MockSession {
    host: String,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl CommandRunner for MockSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let hang = {
            let mut state = self.state.lock();
            state.executed.push(ExecutedCommand {
                host: self.host.clone(),
                command: command.to_string(),
            });
            let hang = state.hosts.get(&self.host).map(|h| h.hang).unwrap_or(false);
            hang
        };

        if hang {
            log::info!("⏳ [MOCK] {} hangs on '{}'", self.host, command);
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        let mock = state
            .hosts
            .get_mut(&self.host)
            .ok_or_else(|| AuditError::connection(&self.host, "host removed"))?;

        if let Some(response) = mock.overrides.get(command) {
            return response.clone();
        }

        let output = match command {
            ISOLATION_COMMAND => CommandOutput::new(mock.isolation.clone(), 0),
            CPU_COUNT_COMMAND => CommandOutput::new(mock.nproc.clone(), 0),
            STAT_COMMAND => {
                let text = if mock.stats.len() > 1 {
                    mock.stats.pop_front().unwrap_or_default()
                } else {
                    mock.stats.front().cloned().unwrap_or_default()
                };
                CommandOutput::new(text, 0)
            }
            other => CommandOutput::new(format!("bash: {}: command not found\n", other), 127),
        };

        log::info!("📤 [MOCK] {} ran '{}' -> exit {}", self.host, command, output.exit_status);
        Ok(output)
    }
}
