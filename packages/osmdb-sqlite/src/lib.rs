#![forbid(unsafe_code)]
//! SQLite persistence for osmdb index state.
//! Index rows and checkpoints live in one `kv` table so a reopened database resumes indexing
//! from its stored checkpoints instead of replaying the whole log.

mod storage;

pub use storage::SqliteKv;
