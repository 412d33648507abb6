pub mod config;
pub mod db;
pub mod recovery;
pub mod storage;
pub mod wal;

pub use config::Config;
pub use db::{NaiveStorage, NaiveStorageError};
