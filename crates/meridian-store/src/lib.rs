mod backend;
pub use backend::StorageBackend;

mod entry;
pub use entry::StoredEntry;

mod error;
pub use error::StoreError;

mod failover;
pub use failover::{FailoverStore, StoreMode};

mod file;
pub use file::FileBackend;

mod memory;
pub use memory::MemoryBackend;

mod remote;
pub use remote::RemoteBackend;
