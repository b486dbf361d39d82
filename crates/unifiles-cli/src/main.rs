//! unifiles command-line front end.
//!
//! Usage:
//!   # Local directory (default: current directory)
//!   unifiles --root /srv/data ls /docs
//!
//!   # Backend chosen by a config file
//!   unifiles --config unifiles.toml cat /docs/readme.md
//!
//! Logs go to stderr; set RUST_LOG=unifiles=debug for backend detail.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing_subscriber::{EnvFilter, fmt};

use unifiles::{
    BackendConfig, BackendKind, CopyOptions, FileInfo, Files, ListOptions, ReadOptions,
    UnifilesConfig, once_bytes,
};

/// Files API over local disk, memory or sandbox storage.
#[derive(Parser, Debug)]
#[command(name = "unifiles")]
#[command(about = "One files API over several storage backends")]
struct Args {
    /// TOML config selecting the backend
    #[arg(short, long, conflicts_with = "root")]
    config: Option<PathBuf>,

    /// Local directory to serve (used when no config is given)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Print entries as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show metadata for one path
    Stat { path: String },
    /// Print a file, optionally a byte range of it
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long)]
        end: Option<u64>,
    },
    /// Replace a file with the content of SOURCE (stdin when omitted)
    Put { path: String, source: Option<PathBuf> },
    /// Append SOURCE (stdin when omitted) to a file
    Append { path: String, source: Option<PathBuf> },
    /// Remove a file or directory tree
    Rm { path: String },
    /// Copy a file or directory
    Cp {
        from: String,
        to: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Move a file or directory
    Mv { from: String, to: String },
    /// Create a directory
    Mkdir { path: String },
}

fn build_files(args: &Args) -> Result<Files> {
    let config = match &args.config {
        Some(path) => UnifilesConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => UnifilesConfig {
            backend: BackendConfig {
                kind: BackendKind::Local,
                root: Some(args.root.clone().unwrap_or_else(|| PathBuf::from("."))),
            },
            ..Default::default()
        },
    };
    if config.backend.kind == BackendKind::ObjectStore {
        bail!("the object_store backend needs an object client and cannot be built from the command line");
    }
    tracing::debug!(kind = config.backend.kind.as_str(), "building backend");
    Ok(config.build()?)
}

async fn read_source(source: Option<PathBuf>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match source {
        Some(path) => {
            data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
        }
        None => {
            tokio::io::stdin().read_to_end(&mut data).await?;
        }
    }
    Ok(data)
}

fn format_entry(info: &FileInfo, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(info)?);
    }
    let marker = if info.is_dir() { 'd' } else { '-' };
    Ok(format!("{marker} {:>10} {}", info.size, info.path))
}

async fn run<W: AsyncWrite + Unpin>(
    files: &Files,
    command: Command,
    json: bool,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Ls { path, recursive } => {
            let options = ListOptions {
                recursive,
                ..Default::default()
            };
            let mut entries = files.list(path.as_str(), options);
            while let Some(entry) = entries.next().await {
                let line = format_entry(&entry?, json)?;
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
            }
        }
        Command::Stat { path } => {
            let Some(info) = files.stats(path.as_str()).await? else {
                bail!("{path}: no such file or directory");
            };
            let line = format_entry(&info, json)?;
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        Command::Cat { path, start, end } => {
            let options = ReadOptions {
                start,
                end,
                ..Default::default()
            };
            let mut chunks = files.read(path.as_str(), options);
            while let Some(chunk) = chunks.next().await {
                out.write_all(&chunk?).await?;
            }
        }
        Command::Put { path, source } => {
            let data = read_source(source).await?;
            let written = files.write(path.as_str(), data).await?;
            tracing::info!(%path, written, "wrote file");
        }
        Command::Append { path, source } => {
            let data = read_source(source).await?;
            let written = files.append(path.as_str(), once_bytes(data), None).await?;
            tracing::info!(%path, written, "appended");
        }
        Command::Rm { path } => {
            if !files.remove(path.as_str()).await? {
                bail!("{path}: no such file or directory");
            }
        }
        Command::Cp { from, to, recursive } => {
            if !files
                .copy(from.as_str(), to.as_str(), CopyOptions { recursive })
                .await?
            {
                bail!("{from}: no such file or directory");
            }
        }
        Command::Mv { from, to } => {
            if !files.rename(from.as_str(), to.as_str()).await? {
                bail!("{from}: no such file or directory");
            }
        }
        Command::Mkdir { path } => files.mkdir(path.as_str()).await?,
    }
    out.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries file content, so logs go to stderr
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let files = build_files(&args)?;
    let mut stdout = tokio::io::stdout();
    run(&files, args.command, args.json, &mut stdout)
        .await
        .inspect_err(|e| tracing::debug!(error = ?e, "command failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(dir: &tempfile::TempDir) -> Files {
        let args = Args::parse_from(["unifiles", "--root", dir.path().to_str().unwrap(), "ls"]);
        build_files(&args).unwrap()
    }

    async fn output(files: &Files, argv: &[&str]) -> Result<String> {
        let args = Args::parse_from(std::iter::once("unifiles").chain(argv.iter().copied()));
        let mut out = Vec::new();
        run(files, args.command, args.json, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    #[tokio::test]
    async fn test_put_cat_ls() {
        let dir = tempfile::tempdir().unwrap();
        let files = local(&dir);
        let source = dir.path().join("input.txt");
        std::fs::write(&source, "hello").unwrap();

        output(&files, &["put", "/docs/a.txt", source.to_str().unwrap()])
            .await
            .unwrap();
        assert_eq!(output(&files, &["cat", "/docs/a.txt"]).await.unwrap(), "hello");
        assert_eq!(
            output(&files, &["cat", "/docs/a.txt", "--start", "1", "--end", "3"])
                .await
                .unwrap(),
            "el"
        );

        let listing = output(&files, &["ls", "/docs"]).await.unwrap();
        assert!(listing.contains("/docs/a.txt"));
        assert!(listing.starts_with('-'));
    }

    #[tokio::test]
    async fn test_missing_paths_fail() {
        let dir = tempfile::tempdir().unwrap();
        let files = local(&dir);
        assert!(output(&files, &["rm", "/nope"]).await.is_err());
        assert!(output(&files, &["stat", "/nope"]).await.is_err());
        assert!(output(&files, &["mv", "/nope", "/other"]).await.is_err());
    }

    #[tokio::test]
    async fn test_stat_json() {
        let dir = tempfile::tempdir().unwrap();
        let files = local(&dir);
        output(&files, &["mkdir", "/made"]).await.unwrap();

        let line = output(&files, &["--json", "stat", "/made"]).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["kind"], "directory");
        assert_eq!(value["path"], "/made");
    }

    #[test]
    fn test_config_file_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("unifiles.toml");
        std::fs::write(&config, "[backend]\nkind = \"sandbox\"\n").unwrap();

        let args = Args::parse_from(["unifiles", "--config", config.to_str().unwrap(), "ls"]);
        assert_eq!(build_files(&args).unwrap().kind(), BackendKind::Sandbox);

        std::fs::write(&config, "[backend]\nkind = \"object_store\"\n").unwrap();
        assert!(build_files(&args).is_err());
    }
}
