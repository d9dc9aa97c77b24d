mod cli;

use anyhow::{Result, bail};
use clap::Parser;
use cli::{Cli, ClientCommand, Commands};
use netfs::block::BlockLayer;
use netfs::cadapter::{MemStore, RpcStore};
use netfs::config::FsConfig;
use netfs::daemon::BlockServer;
use netfs::error::{FsError, status};
use netfs::meta::{FileSystem, InodeType, Namespace, ROOT_INODE};
use netfs::vfs::PathResolver;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let cfg = cli.fs_config()?;

    let command = match cli.command {
        Commands::Serve { listen } => return serve(&cfg, listen).await,
        Commands::Client(command) => command,
    };

    let fs = FileSystem::new(BlockLayer::connect(cfg)?);
    fs.blocks().acquire().await?;
    let outcome = execute(&fs, command).await;
    let released = fs.blocks().release().await;
    if let Err(e) = &outcome {
        error!("command failed: {e:#}");
    }
    outcome?;
    released?;
    Ok(())
}

async fn serve(cfg: &FsConfig, listen: Option<String>) -> Result<()> {
    let addr = listen.unwrap_or_else(|| cfg.server_addr());
    let store = MemStore::new(cfg.total_num_blocks, cfg.block_size);
    let server = BlockServer::bind(addr, store).await?;
    tokio::select! {
        res = server.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("block server shutting down");
            Ok(())
        }
    }
}

/// Runs one client command; the caller holds the lock.
async fn execute(fs: &FileSystem<RpcStore>, command: ClientCommand) -> Result<()> {
    let paths = PathResolver::new(fs);
    match command {
        ClientCommand::Mkfs => fs.mkfs().await?,
        ClientCommand::Create { path } => {
            let (parent, name) = split_parent(&path);
            let dir = existing(&paths, parent).await?;
            report(fs.create(dir, name, InodeType::File).await)?;
        }
        ClientCommand::Mkdir { path } => {
            let (parent, name) = split_parent(&path);
            let dir = existing(&paths, parent).await?;
            report(fs.create(dir, name, InodeType::Dir).await)?;
        }
        ClientCommand::Write { path, data, offset } => {
            let ino = existing(&paths, &path).await?;
            let written = fs.write_at(ino, offset, data.as_bytes()).await;
            report(written.map(|n| n as u32))?;
        }
        ClientCommand::Cat { path } => {
            let ino = existing(&paths, &path).await?;
            match fs.read_at(ino, 0, fs.config().max_file_size()).await {
                Ok(data) => println!("{}", String::from_utf8_lossy(&data)),
                Err(e) => report::<u32>(Err(e))?,
            }
        }
        ClientCommand::Ls { path } => {
            let dir = existing(&paths, &path).await?;
            for (name, ino) in fs.readdir(dir).await? {
                println!("{ino}\t{name}");
            }
        }
        ClientCommand::Resolve { path } => {
            match paths.path_name_to_inode_number(&path, ROOT_INODE).await {
                Ok(ino) => println!("{}", ino.map_or(-1, i64::from)),
                Err(e) => report::<u32>(Err(e))?,
            }
        }
        ClientCommand::Ln { target, name, dir } => {
            let dir = existing(&paths, &dir).await?;
            report(paths.link(&target, &name, dir).await.map(|()| 0u32))?;
        }
        ClientCommand::LnS { target, name, dir } => {
            let dir = existing(&paths, &dir).await?;
            report(paths.symlink(&target, &name, dir).await)?;
        }
        ClientCommand::Dump { file } => fs.blocks().dump_to_disk(&file).await?,
        ClientCommand::Load { file } => match fs.blocks().load_from_dump(&file).await {
            Err(e) if !e.is_fatal() => println!("{e}"),
            res => res?,
        },
        ClientCommand::Blocks { min, max, tag } => {
            print!("{}", fs.blocks().format_blocks(&tag, min, max).await?);
        }
    }
    Ok(())
}

/// Prints a recoverable outcome as `(code, "reason")`; fatal errors abort.
fn report<T: Into<i64> + Copy>(result: Result<T, FsError>) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => Err(e.into()),
        other => {
            let (code, reason) = status(&other);
            println!("({code}, {reason:?})");
            Ok(())
        }
    }
}

async fn existing(paths: &PathResolver<'_, FileSystem<RpcStore>>, path: &str) -> Result<u32> {
    match paths.path_name_to_inode_number(path, ROOT_INODE).await? {
        Some(ino) => Ok(ino),
        None => bail!("{path}: no such file or directory"),
    }
}

// "/a/b" -> ("/a", "b"), "b" -> ("/", "b")
fn split_parent(path: &str) -> (&str, &str) {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", path),
    }
}
