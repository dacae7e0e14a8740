pub mod adapters;
pub mod worker;

pub use worker::{Worker, WorkerConfig};
