//! Byte-level file I/O and file/directory creation.

use super::fs::FileSystem;
use super::inode::{Inode, InodeType};
use super::{InodeHandle, Namespace, valid_name};
use crate::cadapter::client::RemoteStore;
use crate::error::{Failure, FsError, FsOp};
use tracing::debug;

impl<S: RemoteStore> FileSystem<S> {
    /// Creates an empty file or directory `name` inside `dir` and returns its
    /// inode number. Directories start with `.` and `..`.
    pub async fn create(&self, dir: u32, name: &str, kind: InodeType) -> Result<u32, FsError> {
        let fail = |reason: Failure| {
            debug!(dir, entry = name, ?reason, "create rejected");
            Err(FsError::op(FsOp::Create, reason))
        };
        if !matches!(kind, InodeType::File | InodeType::Dir) {
            return fail(Failure::InvalidType);
        }
        let mut parent = InodeHandle::load(self, dir).await?;
        if !parent.inode.is_dir() {
            return fail(Failure::NotDirectory);
        }
        let Some(slot) = self.find_available_file_entry(dir).await? else {
            return fail(Failure::DataBlockNotAvailable);
        };
        // a new directory also needs a block for its own entries
        if kind == InodeType::Dir {
            let per_block = self.config().dirents_per_block();
            let parent_needs = parent.inode.block_numbers[slot / per_block] == 0;
            let want = 1 + usize::from(parent_needs);
            if self.free_data_blocks(want).await? < want {
                return fail(Failure::DataBlockNotAvailable);
            }
        }
        if self.lookup(name, dir).await?.is_some() {
            return fail(Failure::AlreadyExists);
        }
        let Some(ino) = self.find_available_inode().await? else {
            return fail(Failure::InodeNotAvailable);
        };
        if !valid_name(name, self.config()) {
            return fail(Failure::InvalidName);
        }

        let mut child = InodeHandle {
            number: ino,
            inode: Inode::new(kind, self.config()),
        };
        child.inode.refcnt = 1;
        child.store(self).await?;
        if kind == InodeType::Dir {
            self.insert_filename_inode_number(&mut child, ".", ino).await?;
            self.insert_filename_inode_number(&mut child, "..", dir).await?;
        }

        self.insert_filename_inode_number(&mut parent, name, ino)
            .await?;
        parent.inode.refcnt += 1;
        parent.store(self).await?;
        Ok(ino)
    }

    /// Writes `data` at `offset`, allocating data blocks on demand.
    ///
    /// Writes may start anywhere up to the current size; they grow the file
    /// but never past `max_file_size`.
    pub async fn write_at(&self, ino: u32, offset: u32, data: &[u8]) -> Result<usize, FsError> {
        let cfg = self.config();
        let mut file = InodeHandle::load(self, ino).await?;
        if file.inode.kind != InodeType::File {
            return Err(FsError::op(FsOp::Write, Failure::NotFile));
        }
        if offset > file.inode.size {
            return Err(FsError::op(FsOp::Write, Failure::OffsetLargerThanSize));
        }
        let end = offset as usize + data.len();
        if end > cfg.max_file_size() {
            return Err(FsError::op(FsOp::Write, Failure::ExceedsFileSize));
        }

        let bs = cfg.block_size;
        let mut pos = offset as usize;
        let mut written = 0;
        while written < data.len() {
            let index = pos / bs;
            let within = pos % bs;
            let n = (bs - within).min(data.len() - written);
            if file.inode.block_numbers[index] == 0 {
                file.inode.block_numbers[index] = self.allocate_data_block().await?;
            }
            self.patch_block(
                file.inode.block_numbers[index],
                within,
                &data[written..written + n],
            )
            .await?;
            pos += n;
            written += n;
        }

        file.inode.size = file.inode.size.max(end as u32);
        file.store(self).await?;
        Ok(written)
    }

    /// Reads up to `count` bytes from `offset`, stopping at end of file.
    pub async fn read_at(&self, ino: u32, offset: u32, count: usize) -> Result<Vec<u8>, FsError> {
        let inode = self.load_inode(ino).await?;
        if inode.kind != InodeType::File {
            return Err(FsError::op(FsOp::Read, Failure::NotFile));
        }
        if offset > inode.size {
            return Err(FsError::op(FsOp::Read, Failure::OffsetLargerThanSize));
        }

        let bs = self.config().block_size;
        let end = (offset as usize).saturating_add(count).min(inode.size as usize);
        let mut out = Vec::with_capacity(end - offset as usize);
        let mut pos = offset as usize;
        while pos < end {
            let within = pos % bs;
            let n = (bs - within).min(end - pos);
            match inode.block_numbers[pos / bs] {
                // never written
                0 => out.resize(out.len() + n, 0),
                block => {
                    let raw = self.read_block(block).await?;
                    out.extend_from_slice(&raw[within..within + n]);
                }
            }
            pos += n;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::meta::ROOT_INODE;
    use crate::meta::fs::tests::{formatted, new_store};

    fn reason(err: FsError) -> OpError {
        err.op_error().expect("reported failure")
    }

    #[tokio::test]
    async fn test_create_file_and_directory() {
        let fs = formatted(&new_store(), 0).await;
        let file = fs.create(ROOT_INODE, "file.txt", InodeType::File).await.unwrap();
        let dir = fs.create(ROOT_INODE, "docs", InodeType::Dir).await.unwrap();
        assert_eq!((file, dir), (1, 2));

        assert_eq!(fs.lookup("file.txt", ROOT_INODE).await.unwrap(), Some(1));
        assert_eq!(
            fs.readdir(dir).await.unwrap(),
            vec![(".".to_string(), 2), ("..".to_string(), 0)]
        );
        let root = fs.load_inode(ROOT_INODE).await.unwrap();
        assert_eq!(root.refcnt, 3);
        let f = fs.load_inode(file).await.unwrap();
        assert_eq!((f.kind, f.size, f.refcnt), (InodeType::File, 0, 1));
    }

    #[tokio::test]
    async fn test_create_failures() {
        let fs = formatted(&new_store(), 0).await;
        let file = fs.create(ROOT_INODE, "a", InodeType::File).await.unwrap();

        let e = reason(fs.create(ROOT_INODE, "s", InodeType::Sym).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_CREATE_INVALID_TYPE");
        let e = reason(fs.create(file, "b", InodeType::File).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_CREATE_NOT_DIRECTORY");
        let e = reason(fs.create(ROOT_INODE, "a", InodeType::File).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_CREATE_ALREADY_EXISTS");
        let e = reason(fs.create(ROOT_INODE, "bad/name", InodeType::File).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_CREATE_INVALID_NAME");

        // spread over a second directory so no directory runs out of entries
        let sub = fs.create(ROOT_INODE, "d", InodeType::Dir).await.unwrap();
        for i in 3..fs.config().max_num_inodes {
            fs.create(sub, &format!("f{i}"), InodeType::File).await.unwrap();
        }
        let e = reason(fs.create(ROOT_INODE, "full", InodeType::File).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_CREATE_INODE_NOT_AVAILABLE");
    }

    #[tokio::test]
    async fn test_write_then_read_across_blocks() {
        let fs = formatted(&new_store(), 0).await;
        let ino = fs.create(ROOT_INODE, "big", InodeType::File).await.unwrap();
        let bs = fs.config().block_size;
        let data: Vec<u8> = (0..bs + 40).map(|i| i as u8).collect();

        assert_eq!(fs.write_at(ino, 0, &data).await.unwrap(), data.len());
        assert_eq!(fs.read_at(ino, 0, 4096).await.unwrap(), data);
        assert_eq!(
            fs.read_at(ino, bs as u32 - 2, 4).await.unwrap(),
            data[bs - 2..bs + 2].to_vec()
        );

        // overwrite in place does not grow the file
        fs.write_at(ino, 4, b"xy").await.unwrap();
        let inode = fs.load_inode(ino).await.unwrap();
        assert_eq!(inode.size as usize, data.len());
        assert_ne!(inode.block_numbers[1], 0);
        assert_eq!(&fs.read_at(ino, 3, 4).await.unwrap(), &[3, b'x', b'y', 6]);
    }

    #[tokio::test]
    async fn test_write_failures() {
        let fs = formatted(&new_store(), 0).await;
        let ino = fs.create(ROOT_INODE, "f", InodeType::File).await.unwrap();
        let max = fs.config().max_file_size();

        let e = reason(fs.write_at(ROOT_INODE, 0, b"x").await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_WRITE_NOT_FILE");
        let e = reason(fs.write_at(ino, 1, b"x").await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_WRITE_OFFSET_LARGER_THAN_SIZE");
        let e = reason(fs.write_at(ino, 0, &vec![1; max + 1]).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_WRITE_EXCEEDS_FILE_SIZE");
        assert_eq!(fs.write_at(ino, 0, &vec![1; max]).await.unwrap(), max);

        let e = reason(fs.read_at(ino, max as u32 + 1, 1).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_READ_OFFSET_LARGER_THAN_SIZE");
        let e = reason(fs.read_at(ROOT_INODE, 0, 1).await.unwrap_err());
        assert_eq!(e.to_string(), "ERROR_READ_NOT_FILE");
    }
}
