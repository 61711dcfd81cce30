//! Sidecar: capture conversation fragments into tracked situations and keep
//! a generated brief for each one.

pub mod briefs;
pub mod capture;
pub mod db;
pub mod error;
pub mod ids;
pub mod llm;
pub mod models;
pub mod protocol;
pub mod report;
pub mod settings;
pub mod situations;
pub mod store;
pub mod transfer;

pub use error::{Result, SidecarError, StoreError};
pub use protocol::{Request, Response, Sidecar};
pub use store::{KvStore, MemoryStore, Partition, Storage};
