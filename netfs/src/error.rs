use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the block access layer and the remote store adapters.
///
/// Every variant ends the session: the caller must not keep operating on
/// state it could not verify. `Transport` and `Io` are retried internally
/// before they surface as `Timeout`.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {block} out of range [0, {total})")]
    OutOfRange { block: u32, total: u32 },

    #[error("payload of {len} bytes exceeds block size {block_size}")]
    Oversized { len: usize, block_size: usize },

    #[error("block server rejected {op} of block {block}: {msg}")]
    Server {
        op: &'static str,
        block: u32,
        msg: String,
    },

    #[error("{op} of block {block} failed after {attempts} attempts")]
    Timeout {
        op: &'static str,
        block: u32,
        attempts: u32,
    },

    #[error("lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl BlockError {
    /// Whether the failure is transient and the request may be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlockError::Transport(_) | BlockError::Io(_))
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot constants {found} do not match current file system constants {expected}")]
    FingerprintMismatch { found: String, expected: String },

    #[error("snapshot not in proper format: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Block(#[from] BlockError),
}

impl SnapshotError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SnapshotError::Block(_))
    }
}

/// Operation a reported failure belongs to; it prefixes the status string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsOp {
    Create,
    Link,
    Symlink,
    Write,
    Read,
}

impl FsOp {
    fn as_str(self) -> &'static str {
        match self {
            FsOp::Create => "CREATE",
            FsOp::Link => "LINK",
            FsOp::Symlink => "SYMLINK",
            FsOp::Write => "WRITE",
            FsOp::Read => "READ",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    NotDirectory,
    TargetDoesNotExist,
    TargetNotFile,
    DataBlockNotAvailable,
    AlreadyExists,
    InodeNotAvailable,
    TargetExceedsBlockSize,
    InvalidName,
    InvalidType,
    NotFile,
    OffsetLargerThanSize,
    ExceedsFileSize,
}

impl Failure {
    fn as_str(self) -> &'static str {
        match self {
            Failure::NotDirectory => "NOT_DIRECTORY",
            Failure::TargetDoesNotExist => "TARGET_DOESNOT_EXIST",
            Failure::TargetNotFile => "TARGET_NOT_FILE",
            Failure::DataBlockNotAvailable => "DATA_BLOCK_NOT_AVAILABLE",
            Failure::AlreadyExists => "ALREADY_EXISTS",
            Failure::InodeNotAvailable => "INODE_NOT_AVAILABLE",
            Failure::TargetExceedsBlockSize => "TARGET_EXCEEDS_BLOCK_SIZE",
            Failure::InvalidName => "INVALID_NAME",
            Failure::InvalidType => "INVALID_TYPE",
            Failure::NotFile => "NOT_FILE",
            Failure::OffsetLargerThanSize => "OFFSET_LARGER_THAN_SIZE",
            Failure::ExceedsFileSize => "EXCEEDS_FILE_SIZE",
        }
    }
}

/// A reported, recoverable failure such as `ERROR_LINK_NOT_DIRECTORY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpError {
    pub op: FsOp,
    pub reason: Failure,
}

impl OpError {
    pub fn new(op: FsOp, reason: Failure) -> Self {
        Self { op, reason }
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR_{}_{}", self.op.as_str(), self.reason.as_str())
    }
}

impl std::error::Error for OpError {}

#[derive(Debug, Error)]
pub enum FsError {
    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Op(#[from] OpError),

    #[error("too many levels of symbolic links resolving {path} (limit {limit})")]
    SymlinkDepth { path: String, limit: usize },

    #[error("no free data blocks")]
    NoFreeBlocks,

    #[error("invalid file name {0:?}")]
    InvalidName(String),

    #[error("directory {dir} has no free entry")]
    DirectoryFull { dir: u32 },

    #[error("corrupt {what}: {detail}")]
    Corrupt { what: &'static str, detail: String },
}

impl FsError {
    pub fn op(op: FsOp, reason: Failure) -> Self {
        FsError::Op(OpError::new(op, reason))
    }

    /// Fatal errors mean the session's view of the store can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Block(_) | FsError::Corrupt { .. })
    }

    /// The reported failure, if this is one.
    pub fn op_error(&self) -> Option<OpError> {
        match self {
            FsError::Op(e) => Some(*e),
            _ => None,
        }
    }
}

/// Renders an operation outcome as the `(code, reason)` pair shown to users.
pub fn status<T: Into<i64> + Copy>(result: &Result<T, FsError>) -> (i64, String) {
    match result {
        Ok(code) => ((*code).into(), "SUCCESS".to_string()),
        Err(e) => (-1, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_error_renders_status_code() {
        let e = FsError::op(FsOp::Symlink, Failure::TargetExceedsBlockSize);
        assert_eq!(e.to_string(), "ERROR_SYMLINK_TARGET_EXCEEDS_BLOCK_SIZE");
        assert!(!e.is_fatal());

        let e = FsError::op(FsOp::Link, Failure::TargetDoesNotExist);
        assert_eq!(e.to_string(), "ERROR_LINK_TARGET_DOESNOT_EXIST");
    }

    #[test]
    fn status_pairs() {
        let ok: Result<u32, FsError> = Ok(5);
        assert_eq!(status(&ok), (5, "SUCCESS".to_string()));

        let err: Result<u32, FsError> = Err(FsError::op(FsOp::Link, Failure::NotDirectory));
        assert_eq!(status(&err), (-1, "ERROR_LINK_NOT_DIRECTORY".to_string()));

        let fatal: Result<u32, FsError> = Err(BlockError::OutOfRange { block: 300, total: 256 }.into());
        assert!(fatal.as_ref().unwrap_err().is_fatal());
    }
}
