/*!
# cpuwatch DevKit - Doublures et utilitaires de test

Bibliothèque facilitant les tests de l'auditeur CPU avec:
- Connecteur SSH simulé (réponses scriptées, hôtes injoignables, blocages)
- Fixtures /proc/stat avec deltas connus
- Harness de bout en bout pour l'auditeur de flotte
*/

pub mod mock_ssh;
pub mod stat_fixtures;
pub mod test_utils;

pub use mock_ssh::{MockConnector, MockHost};
pub use stat_fixtures::{ProcStatBuilder, SamplePair};
pub use test_utils::TestHarness;
