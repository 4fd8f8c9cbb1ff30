pub mod lock;
pub mod model;
pub mod store;

pub use lock::StateLock;
pub use model::{Checkpoint, EnumerationPayload, FileTotals, RunState, STATE_SCHEMA_VERSION};
pub use store::{StateSource, StateStatus, StateStore};
