/*!
# Corridor Kernel - Relay temps réel des rooms de suivi et des zones

Autorité serveur des rooms (`safe-<vehicleId>`) et des zones (`city-core`...) :
- `hub` : appartenance peer ↔ room, fan-out
- `zones` : sirène virtuelle, statut corridor, miroir des notes pré-arrivée
- `dispatch` / `mqtt` : uplinks des guardians vers le hub
- `http` : API opérateur + collaborateur REST pré-arrivée
*/

pub mod config;
pub mod contracts;
pub mod dispatch;
pub mod drill;
pub mod health;
pub mod http;
pub mod hub;
pub mod mqtt;
pub mod prearrival;
pub mod zones;
