pub mod database;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod storage;

pub use database::MongoRegistry;
pub use metrics::{get_metrics, init_metrics};
pub use queue::DispatchQueue;
pub use registry::{DocumentRegistry, InMemoryRegistry};
pub use storage::{output_key, upload_key, LocalStorage, Storage};
