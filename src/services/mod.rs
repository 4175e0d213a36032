// Placestore services
// Services hold the stateless machinery the managers build on: validation, sync
// bookkeeping, observer fan-out and configuration.

pub mod observers;
pub mod settings_engine;
pub mod sync_tracker;
pub mod validator;
