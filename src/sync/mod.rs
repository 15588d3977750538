// Master-to-slave sync engine: capture-then-flush execution with an
// external KV buffer, field mapping, and conflict resolution.

pub mod conflict_resolver;
pub mod executor;
pub mod field_mapper;
pub mod state_manager;

pub use conflict_resolver::{ConflictResolver, Resolution};
pub use executor::{execute_sync, SyncContext};
pub use field_mapper::FieldMapper;
pub use state_manager::StateManager;
