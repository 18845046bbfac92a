//! 记忆层：跨回合的工作记忆摘要，以及按 run id 的状态持久化

pub mod persistence;
pub mod working;

pub use persistence::{FileStateStore, InMemoryStateStore, StateStore};
pub use working::{DigestEntry, DigestLimits, WorkingMemory};
