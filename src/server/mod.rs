pub mod engine;
pub mod master;
pub mod provider;
pub mod worker;

pub use engine::Engine;
pub use master::{MasterOptions, MasterServer};
pub use worker::{WorkerOptions, WorkerServer};
