pub mod store;
pub mod types;

pub use store::{FileStore, KeyValueStore, MemoryStore, PersistenceStore, HISTORY_KEY};
pub use types::Message;
