use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use tracing::debug;

use dfs_server::{FileServer, ServerConfig};
use dfs_store::{BlobStore, DiskStore, StoreConfig};

use crate::cli::*;

const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Put(args) => cmd_put(args).await,
        Command::Get(args) => cmd_get(args),
        Command::Has(args) => cmd_has(args),
        Command::Rm(args) => cmd_rm(args),
    }
}

fn serve_config(args: ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ServerConfig::new(DEFAULT_LISTEN),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if !args.bootstrap.is_empty() {
        config.bootstrap_nodes = args.bootstrap;
    }
    if let Some(root) = args.root {
        config.store.root = root;
    }
    if let Some(transform) = args.transform {
        config.store.transform = transform.into();
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = serve_config(args)?;
    let server = FileServer::new(config)?;
    let drain = server.start().await?;

    let addr = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    println!("{} Node listening on {}", "✓".green().bold(), addr.bold());
    println!("  Store: {} ({})", server.config().store.root.display(), server.config().store.transform.to_string().cyan());
    for seed in server.config().bootstrap_addrs() {
        println!("  Bootstrap: {}", seed.yellow());
    }

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    server.stop()?;
    drain.await.context("drain loop panicked")?;
    println!("{} Node stopped.", "✓".green());
    Ok(())
}

async fn cmd_put(args: PutArgs) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("cannot open {}", args.file.display()))?;

    let config = ServerConfig::new(args.listen)
        .with_bootstrap([args.peer.clone()])
        .with_store(StoreConfig::new(args.root, args.transform.into()));
    let server = FileServer::new(config)?;
    let drain = server.start().await?;

    let outcome = async {
        server
            .wait_for_peers(1, Duration::from_secs(args.timeout))
            .await
            .with_context(|| format!("could not reach {}", args.peer))?;
        debug!(peers = ?server.peer_addrs(), "peer connected");
        server
            .store_file(&args.key, file)
            .await
            .with_context(|| format!("failed to store {}", args.key))
    }
    .await;

    // Stop regardless of outcome so the transport is always released.
    server.stop()?;
    drain.await.context("drain loop panicked")?;

    let reached = outcome?;
    println!(
        "{} Stored {} and replicated to {} peer(s)",
        "✓".green().bold(),
        args.key.yellow(),
        reached.to_string().bold()
    );
    Ok(())
}

fn open_store(root: std::path::PathBuf, transform: TransformArg) -> DiskStore {
    DiskStore::new(StoreConfig::new(root, transform.into()))
}

fn cmd_get(args: GetArgs) -> anyhow::Result<()> {
    let store = open_store(args.root, args.transform);
    let data = store
        .read_bytes(&args.key)
        .with_context(|| format!("failed to read {}", args.key))?;
    match args.out {
        Some(path) => {
            std::fs::write(&path, &data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} Wrote {} bytes to {}", "✓".green(), data.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_has(args: KeyArgs) -> anyhow::Result<()> {
    let store = open_store(args.root, args.transform);
    if store.has(&args.key) {
        println!("{} {}", "present:".green(), args.key);
    } else {
        println!("{} {}", "missing:".red(), args.key);
    }
    Ok(())
}

fn cmd_rm(args: KeyArgs) -> anyhow::Result<()> {
    let store = open_store(args.root, args.transform);
    store
        .delete(&args.key)
        .with_context(|| format!("failed to delete {}", args.key))?;
    println!("{} Deleted {}", "✓".green(), args.key.yellow());
    Ok(())
}
