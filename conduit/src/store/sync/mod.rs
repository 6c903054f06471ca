mod base;

pub use base::SyncPersistenceStore;
