/*!
# fleetstat DevKit - Stubs et utilitaires pour tests d'orchestration

Bibliothèque pour exercer l'orchestrateur sans ssh ni vrais hôtes :
- Lanceur simulé qui fait tourner les commandes sur l'horloge tokio
- Builders de configurations de flotte
- Harness avec assertions de chronologie (barrières de phase, concurrence des hôtes)
*/

pub mod launcher_stub;
pub mod test_utils;

pub use launcher_stub::{CommandRecord, MockLauncher, Script};
pub use test_utils::{assert_about, phase, FleetBuilder, HostBuilder, TestHarness};
