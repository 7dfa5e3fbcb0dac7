pub mod store;
mod upsert;

pub use store::{KubeStore, ManagedObject, ObjectStore, StoreError};
pub use upsert::upsert;
