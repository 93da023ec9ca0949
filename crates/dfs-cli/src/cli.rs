use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use dfs_store::PathTransform;

#[derive(Parser)]
#[command(
    name = "dfs",
    about = "Distributed file store: replicate blobs across a peer-to-peer network",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a storage node until interrupted
    Serve(ServeArgs),
    /// Store a file on a transient node and replicate it to a peer
    Put(PutArgs),
    /// Print a blob from a local store
    Get(GetArgs),
    /// Check whether a local store holds a key
    Has(KeyArgs),
    /// Delete a key's shard from a local store
    Rm(KeyArgs),
}

/// How keys map to paths on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TransformArg {
    Identity,
    ContentAddressed,
}

impl From<TransformArg> for PathTransform {
    fn from(arg: TransformArg) -> Self {
        match arg {
            TransformArg::Identity => PathTransform::Identity,
            TransformArg::ContentAddressed => PathTransform::ContentAddressed,
        }
    }
}

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address; defaults to 127.0.0.1:3000 without a config file
    #[arg(long)]
    pub listen: Option<String>,
    /// Seed node to dial at startup (repeatable)
    #[arg(long = "bootstrap")]
    pub bootstrap: Vec<String>,
    #[arg(long)]
    pub root: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub transform: Option<TransformArg>,
    /// TOML node configuration; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct PutArgs {
    /// Address of the node to replicate to
    #[arg(long)]
    pub peer: String,
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub file: PathBuf,
    /// Store root of the transient node
    #[arg(long, default_value = "store")]
    pub root: PathBuf,
    #[arg(long, default_value = "127.0.0.1:0")]
    pub listen: String,
    #[arg(long, value_enum, default_value = "content-addressed")]
    pub transform: TransformArg,
    /// Seconds to wait for the peer connection
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(long, default_value = "store")]
    pub root: PathBuf,
    #[arg(long)]
    pub key: String,
    #[arg(long, value_enum, default_value = "content-addressed")]
    pub transform: TransformArg,
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct KeyArgs {
    #[arg(long, default_value = "store")]
    pub root: PathBuf,
    #[arg(long)]
    pub key: String,
    #[arg(long, value_enum, default_value = "content-addressed")]
    pub transform: TransformArg,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_defaults() {
        let cli = Cli::try_parse_from(["dfs", "serve"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert!(args.listen.is_none());
            assert!(args.bootstrap.is_empty());
            assert!(args.config.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_serve_with_bootstrap() {
        let cli = Cli::try_parse_from([
            "dfs", "serve", "--listen", "0.0.0.0:4000",
            "--bootstrap", "127.0.0.1:3000", "--bootstrap", "127.0.0.1:5000",
            "--root", "/tmp/node",
        ]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.listen.as_deref(), Some("0.0.0.0:4000"));
            assert_eq!(args.bootstrap, vec!["127.0.0.1:3000", "127.0.0.1:5000"]);
            assert_eq!(args.root, Some(PathBuf::from("/tmp/node")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from([
            "dfs", "put", "--peer", "127.0.0.1:3000", "--key", "cat.png", "--file", "./cat.png",
        ]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.peer, "127.0.0.1:3000");
            assert_eq!(args.key, "cat.png");
            assert_eq!(args.listen, "127.0.0.1:0");
            assert_eq!(args.timeout, 10);
            assert_eq!(args.transform, TransformArg::ContentAddressed);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn put_requires_peer() {
        assert!(Cli::try_parse_from(["dfs", "put", "--key", "k", "--file", "f"]).is_err());
    }

    #[test]
    fn parse_get_identity() {
        let cli = Cli::try_parse_from([
            "dfs", "get", "--key", "a/b", "--transform", "identity", "-o", "out.bin",
        ]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.root, PathBuf::from("store"));
            assert_eq!(PathTransform::from(args.transform), PathTransform::Identity);
            assert_eq!(args.out, Some(PathBuf::from("out.bin")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_has_and_rm() {
        let cli = Cli::try_parse_from(["dfs", "has", "--key", "k"]).unwrap();
        assert!(matches!(cli.command, Command::Has(_)));
        let cli = Cli::try_parse_from(["dfs", "rm", "--key", "k", "--root", "data"]).unwrap();
        assert!(matches!(cli.command, Command::Rm(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["dfs", "--verbose", "has", "--key", "k"]).unwrap();
        assert!(cli.verbose);
    }
}
