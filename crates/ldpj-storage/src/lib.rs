#![doc = "Durable append-only cycle record store for the leak-detection edge backend."]

pub mod error;
pub mod model;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use model::{NewTestRecord, RecordDetail, RecordFilter, RecordSummary};
pub use store::RecordStore;
