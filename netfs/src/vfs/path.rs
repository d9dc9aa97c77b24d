//! Path walking, symbolic-link dereferencing, and hard/symbolic link
//! creation over a [`Namespace`].
//!
//! Nothing here takes the distributed lock. Callers bracket `link` and
//! `symlink` with `BlockLayer::acquire`/`release`.

use crate::error::{Failure, FsError, FsOp};
use crate::meta::{Inode, InodeHandle, InodeType, Namespace, ROOT_INODE, valid_name};
use tracing::debug;

pub struct PathResolver<'a, N: Namespace + ?Sized> {
    ns: &'a N,
    max_symlink_depth: usize,
}

impl<'a, N: Namespace + ?Sized> PathResolver<'a, N> {
    pub fn new(ns: &'a N) -> Self {
        Self {
            max_symlink_depth: ns.config().max_symlink_depth,
            ns,
        }
    }

    /// Walks a relative `path` component by component starting at `dir`.
    /// Symbolic links met along the way are not followed.
    pub async fn path_to_inode_number(&self, path: &str, dir: u32) -> Result<Option<u32>, FsError> {
        let mut dir = dir;
        let mut rest = path;
        while let Some((first, tail)) = rest.split_once('/') {
            match self.ns.lookup(first, dir).await? {
                Some(ino) => dir = ino,
                None => return Ok(None),
            }
            rest = tail;
        }
        self.ns.lookup(rest, dir).await
    }

    /// Resolves an absolute path from the root and anything else from `cwd`.
    pub async fn general_path_to_inode_number(
        &self,
        path: &str,
        cwd: u32,
    ) -> Result<Option<u32>, FsError> {
        if path == "/" {
            return Ok(Some(ROOT_INODE));
        }
        match path.strip_prefix('/') {
            Some(rest) => self.path_to_inode_number(rest, ROOT_INODE).await,
            None => self.path_to_inode_number(path, cwd).await,
        }
    }

    /// Like [`Self::general_path_to_inode_number`], but a final symbolic
    /// link is replaced by its target, again resolved from `cwd`.
    ///
    /// Gives up with [`FsError::SymlinkDepth`] after `max_symlink_depth`
    /// links, which also catches cycles.
    pub async fn path_name_to_inode_number(
        &self,
        pathname: &str,
        cwd: u32,
    ) -> Result<Option<u32>, FsError> {
        let mut path = pathname.to_string();
        for _ in 0..=self.max_symlink_depth {
            let Some(ino) = self.general_path_to_inode_number(&path, cwd).await? else {
                return Ok(None);
            };
            let inode = self.ns.load_inode(ino).await?;
            if inode.kind != InodeType::Sym {
                return Ok(Some(ino));
            }
            path = self.read_symlink(ino, &inode).await?;
            debug!(ino, link_target = %path, "following symbolic link");
        }
        Err(FsError::SymlinkDepth {
            path: pathname.to_string(),
            limit: self.max_symlink_depth,
        })
    }

    async fn read_symlink(&self, ino: u32, inode: &Inode) -> Result<String, FsError> {
        let raw = self.ns.read_block(inode.block_numbers[0]).await?;
        let target = raw.get(..inode.size as usize).ok_or_else(|| FsError::Corrupt {
            what: "symlink",
            detail: format!("inode {ino} claims {} bytes", inode.size),
        })?;
        String::from_utf8(target.to_vec()).map_err(|e| FsError::Corrupt {
            what: "symlink",
            detail: format!("inode {ino}: {e}"),
        })
    }

    /// Binds `name` in `dir` to the regular file `target` resolves to.
    pub async fn link(&self, target: &str, name: &str, dir: u32) -> Result<(), FsError> {
        debug!(dir, entry = name, "link");
        let fail = |reason: Failure| {
            debug!(dir, entry = name, link_target = target, ?reason, "link rejected");
            Err(FsError::op(FsOp::Link, reason))
        };

        let mut dir_handle = InodeHandle::load(self.ns, dir).await?;
        if !dir_handle.inode.is_dir() {
            return fail(Failure::NotDirectory);
        }
        let Some(target_ino) = self.path_name_to_inode_number(target, dir).await? else {
            return fail(Failure::TargetDoesNotExist);
        };
        let mut target_handle = InodeHandle::load(self.ns, target_ino).await?;
        if target_handle.inode.kind != InodeType::File {
            return fail(Failure::TargetNotFile);
        }
        if self.ns.find_available_file_entry(dir).await?.is_none() {
            return fail(Failure::DataBlockNotAvailable);
        }
        if self.ns.lookup(name, dir).await?.is_some() {
            return fail(Failure::AlreadyExists);
        }
        if !valid_name(name, self.ns.config()) {
            return fail(Failure::InvalidName);
        }

        target_handle.inode.refcnt += 1;
        target_handle.store(self.ns).await?;
        self.ns
            .insert_filename_inode_number(&mut dir_handle, name, target_ino)
            .await?;
        dir_handle.inode.refcnt += 1;
        dir_handle.store(self.ns).await?;
        Ok(())
    }

    /// Creates `name` in `dir` as a symbolic link holding the literal
    /// `target` string and returns the new inode number.
    ///
    /// The link inode is written as a plain file first and only turned into
    /// a symlink once its content is in place. A failure between those two
    /// stores leaves a `FILE` inode holding the target string.
    pub async fn symlink(&self, target: &str, name: &str, dir: u32) -> Result<u32, FsError> {
        debug!(dir, entry = name, "symlink");
        let fail = |reason: Failure| {
            debug!(dir, entry = name, link_target = target, ?reason, "symlink rejected");
            Err(FsError::op(FsOp::Symlink, reason))
        };
        let cfg = self.ns.config();

        let mut dir_handle = InodeHandle::load(self.ns, dir).await?;
        if !dir_handle.inode.is_dir() {
            return fail(Failure::NotDirectory);
        }
        if self.path_name_to_inode_number(target, dir).await?.is_none() {
            return fail(Failure::TargetDoesNotExist);
        }
        let Some(slot) = self.ns.find_available_file_entry(dir).await? else {
            return fail(Failure::DataBlockNotAvailable);
        };
        // one block for the link content, another if the entry opens a new one
        let opens_block = dir_handle.inode.block_numbers[slot / cfg.dirents_per_block()] == 0;
        let want = 1 + usize::from(opens_block);
        if self.ns.free_data_blocks(want).await? < want {
            return fail(Failure::DataBlockNotAvailable);
        }
        if self.ns.lookup(name, dir).await?.is_some() {
            return fail(Failure::AlreadyExists);
        }
        let Some(ino) = self.ns.find_available_inode().await? else {
            return fail(Failure::InodeNotAvailable);
        };
        if target.len() > cfg.block_size {
            return fail(Failure::TargetExceedsBlockSize);
        }
        if !valid_name(name, cfg) {
            return fail(Failure::InvalidName);
        }

        let mut link = InodeHandle {
            number: ino,
            inode: Inode::new(InodeType::File, cfg),
        };
        link.inode.size = target.len() as u32;
        link.inode.refcnt = 1;
        link.inode.block_numbers[0] = self.ns.allocate_data_block().await?;
        link.store(self.ns).await?;
        self.ns.write(ino, 0, target.as_bytes()).await?;
        link.inode.kind = InodeType::Sym;
        link.store(self.ns).await?;

        self.ns
            .insert_filename_inode_number(&mut dir_handle, name, ino)
            .await?;
        dir_handle.inode.refcnt += 1;
        dir_handle.store(self.ns).await?;
        Ok(ino)
    }
}
