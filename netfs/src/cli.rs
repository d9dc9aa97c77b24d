use anyhow::Result;
use clap::{Parser, Subcommand};
use netfs::config::{FsConfig, load_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netfs", version, about = "Networked block file system client")]
pub struct Cli {
    /// YAML file with geometry and client settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Client id, unique among clients sharing a server
    #[arg(long, env = "NETFS_CID", global = true)]
    pub cid: Option<u8>,

    #[arg(long, global = true)]
    pub server: Option<String>,

    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Give up acquiring the lock after this many milliseconds
    #[arg(long, global = true)]
    pub lock_deadline_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run an in-memory block server")]
    Serve {
        /// Listen address, defaults to the configured server address
        #[arg(long)]
        listen: Option<String>,
    },
    #[command(flatten)]
    Client(ClientCommand),
}

/// Commands that run against the block server while holding the lock.
#[derive(Subcommand)]
pub enum ClientCommand {
    #[command(about = "Format the file system")]
    Mkfs,
    #[command(about = "Create an empty regular file")]
    Create { path: String },
    #[command(about = "Create a directory")]
    Mkdir { path: String },
    #[command(about = "Write DATA into a file at OFFSET")]
    Write {
        path: String,
        data: String,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    #[command(about = "Print a file")]
    Cat { path: String },
    #[command(about = "List a directory")]
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    #[command(about = "Print the inode number a path resolves to")]
    Resolve { path: String },
    #[command(about = "Create hard link NAME in DIR to TARGET")]
    Ln {
        target: String,
        name: String,
        #[arg(long, default_value = "/")]
        dir: String,
    },
    #[command(name = "ln-s", about = "Create symbolic link NAME in DIR to TARGET")]
    LnS {
        target: String,
        name: String,
        #[arg(long, default_value = "/")]
        dir: String,
    },
    #[command(about = "Save every block to a snapshot file")]
    Dump { file: PathBuf },
    #[command(about = "Restore every block from a snapshot file")]
    Load { file: PathBuf },
    #[command(about = "Hex dump of blocks MIN up to MAX (exclusive)")]
    Blocks {
        min: u32,
        max: u32,
        #[arg(long, default_value = "blocks")]
        tag: String,
    },
}

impl Cli {
    /// Configuration file (or defaults) with command line overrides applied.
    pub fn fs_config(&self) -> Result<FsConfig> {
        let mut cfg = match &self.config {
            Some(path) => load_config(path)?,
            None => FsConfig::default(),
        };
        if let Some(cid) = self.cid {
            cfg.cid = cid;
        }
        if let Some(server) = &self.server {
            cfg.server_address = server.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if self.lock_deadline_ms.is_some() {
            cfg.lock_deadline_ms = self.lock_deadline_ms;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
