use crate::wal::LogError;
use thiserror::Error;

mod block;
mod buffer;
mod clock;
mod disk;
mod frame;
mod undo;

pub use block::BlockId;
pub use buffer::{BufferPoolConfig, BufferPoolManager};
pub use disk::FileManager;
pub use frame::{BufferFrame, FrameRef, Page, PageFormatter, ZeroFormatter};
pub use undo::{FileUndoStore, UndoStore};

pub const PAGE_SIZE: usize = 4096;
/// Reference value given to a frame when it is freshly assigned or
/// becomes unpinned, unless the pool is configured otherwise.
pub const DEFAULT_REF_COUNT: usize = 5;
/// Number of full sweeps the clock hand makes before giving up.
pub const MAX_CLOCK_PASSES: usize = 5;
pub const DEFAULT_NUM_BUFFERS: usize = 8;

/// `FrameID` is the index of a frame inside the buffer pool.
pub type FrameID = usize;
/// `BlockNum` addresses a block inside one file, it's
/// used as offset for disk.
pub type BlockNum = u64;
pub type TxnID = u64;
/// Log sequence number, as returned by `LogManager::append`.
pub type Lsn = u64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IOError: {0}")]
    IOError(#[from] std::io::Error),
    #[error("cannot allocate buffer for {0}: all frames pinned or referenced")]
    ResourceExhausted(String),
    #[error("unpin of frame {0} which is not pinned")]
    UnbalancedUnpin(FrameID),
    #[error("frame {0} no longer holds the block of this handle")]
    StaleFrame(FrameID),
    #[error("block size must be positive, got {0}")]
    InvalidBlockSize(usize),
    #[error("no pre-image saved at undo offset {0}")]
    UndoImageMissing(u64),
    #[error("LogError: {0}")]
    Log(#[from] LogError),
}
