/*!
Test Harness pour l'auditeur de flotte

Facilite l'écriture de tests de bout en bout avec:
- Setup automatique du connecteur simulé et des métadonnées en mémoire
- Intervalle d'échantillonnage nul (pas d'attente réelle)
- Assertions sur les lignes produites
*/

use crate::mock_ssh::{MockConnector, MockHost};
use anyhow::Result;
use cpuwatch_core::{AuditRow, FleetAuditor, FleetConfig, HostReport, HostTarget, Metadata};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

/// Harness de test complet pour un audit de flotte
pub struct TestHarness {
    pub connector: MockConnector,
    pub metadata: HashMap<String, Metadata>,
    pub config: FleetConfig,
    targets: Vec<HostTarget>,
}

impl TestHarness {
    /// Crée un harness avec un intervalle d'échantillonnage nul
    pub fn new() -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let mut config = FleetConfig::default();
        config.sampler.interval = Duration::ZERO;
        config.sampler.retry_backoff = Duration::ZERO;

        Self {
            connector: MockConnector::new(),
            metadata: HashMap::new(),
            config,
            targets: Vec::new(),
        }
    }

    /// Ajoute un hôte simulé et le place dans la liste à auditer
    pub fn host(&mut self, team: &str, name: &str, host: MockHost) -> &mut Self {
        self.connector.add_host(name, host);
        let num = self.targets.iter().filter(|t| t.team == team).count() + 1;
        self.targets.push(HostTarget::new(num, name, team));
        self
    }

    /// Ajoute une cible sans hôte simulé (résolution impossible)
    pub fn missing_host(&mut self, team: &str, name: &str) -> &mut Self {
        let num = self.targets.iter().filter(|t| t.team == team).count() + 1;
        self.targets.push(HostTarget::new(num, name, team));
        self
    }

    pub fn with_metadata(&mut self, name: &str, owner: &str, instance_type: &str, zone: &str) -> &mut Self {
        self.metadata.insert(
            name.to_string(),
            Metadata {
                owner: Some(owner.to_string()),
                instance_type: Some(instance_type.to_string()),
                availability_zone: Some(zone.to_string()),
            },
        );
        self
    }

    pub fn targets(&self) -> &[HostTarget] {
        &self.targets
    }

    /// Lance l'audit complet sans annulation
    pub async fn run(&self) -> Vec<AuditRow> {
        let (_cancel, rx) = watch::channel(false);
        self.auditor().run(&self.targets, rx).await
    }

    /// Lance l'audit et renvoie les résultats détaillés par hôte
    pub async fn audit(&self) -> Vec<HostReport> {
        let (_cancel, rx) = watch::channel(false);
        self.auditor().audit(&self.targets, rx).await
    }

    pub fn auditor(&self) -> FleetAuditor<'_> {
        FleetAuditor::new(&self.connector, &self.metadata, self.config.clone())
    }

    /// Assert qu'une ligne existe pour l'hôte et la renvoie
    pub fn find_row<'a>(rows: &'a [AuditRow], name: &str) -> Result<&'a AuditRow> {
        rows.iter()
            .find(|r| r.server_name == name)
            .ok_or_else(|| anyhow::anyhow!("No row for host {}", name))
    }

    /// Assert qu'une ligne porte des mesures valides
    pub fn assert_measured(rows: &[AuditRow], name: &str) -> Result<()> {
        let row = Self::find_row(rows, name)?;
        if row.is_sentinel() {
            anyhow::bail!("Host {} has a sentinel row: {}", name, row.status);
        }
        let busy: f64 = row.percent_busy.parse()?;
        let free: f64 = row.percent_free.parse()?;
        if (busy + free - 100.0).abs() > 0.011 {
            anyhow::bail!("Host {}: {}% busy + {}% free != 100", name, busy, free);
        }
        log::info!("✅ Host {} measured: {}% busy", name, row.percent_busy);
        Ok(())
    }

    /// Assert qu'une ligne est une ligne sentinelle contenant `needle`
    pub fn assert_sentinel(rows: &[AuditRow], name: &str, needle: &str) -> Result<()> {
        let row = Self::find_row(rows, name)?;
        if !row.is_sentinel() || !row.status.contains(needle) {
            anyhow::bail!("Host {}: expected sentinel containing '{}', got '{}'", name, needle, row.status);
        }
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat_fixtures::SamplePair;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let pair = SamplePair::new().busy(0).idle(1);
        let mut harness = TestHarness::new();
        harness
            .host("MM", "TA-apne1-md01", MockHost::with_cpus(2).with_stats(pair.first(), pair.second()))
            .with_metadata("TA-apne1-md01", "alice", "c6i.large", "ap-northeast-1a")
            .missing_host("MM", "TA-apne1-md02");

        let rows = harness.run().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].num, 2);

        TestHarness::assert_measured(&rows, "TA-apne1-md01").unwrap();
        TestHarness::assert_sentinel(&rows, "TA-apne1-md02", "Could not resolve hostname").unwrap();

        let row = TestHarness::find_row(&rows, "TA-apne1-md01").unwrap();
        assert_eq!(row.percent_busy, "50.00");
        assert_eq!(row.owner, "alice");
    }
}
