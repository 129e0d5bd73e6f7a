/*!
# Corridor DevKit - Stubs et utilitaires de test du relay

Permet de tester guardians et kernel sans broker MQTT :
- `relay_stub` : transport enregistreur + transport loopback branché sur le hub du kernel
- `sensors` : sources position / batterie scriptées
- `test_utils` : harness relay (hub + zones + store) et helpers d'attente
*/

pub mod relay_stub;
pub mod sensors;
pub mod test_utils;

pub use relay_stub::{LoopbackTransport, MockRelayTransport};
pub use sensors::{ScriptedBattery, ScriptedLocation};
pub use test_utils::RelayHarness;
