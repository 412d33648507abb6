use crate::storage::{BufferPoolConfig, DEFAULT_NUM_BUFFERS, DEFAULT_REF_COUNT, PAGE_SIZE};
use clap::Parser;
use std::path::PathBuf;

/// Startup configuration, read from the command line.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "naive_storage", about = "Buffer pool and undo log of NaiveDB")]
pub struct Config {
    /// database directory, created if it does not exist
    pub db_dir: PathBuf,
    /// reference value of a frame when it is assigned or unpinned
    #[arg(long, default_value_t = DEFAULT_REF_COUNT)]
    pub default_ref_count: usize,
    /// number of frames in the buffer pool
    #[arg(long, default_value_t = DEFAULT_NUM_BUFFERS)]
    pub buffers: usize,
    #[arg(long, default_value_t = PAGE_SIZE)]
    pub block_size: usize,
}

impl Config {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
            default_ref_count: DEFAULT_REF_COUNT,
            buffers: DEFAULT_NUM_BUFFERS,
            block_size: PAGE_SIZE,
        }
    }
    pub fn buffer_pool(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            num_buffers: self.buffers,
            default_ref_count: self.default_ref_count,
        }
    }
}
