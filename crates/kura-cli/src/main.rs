//! kura: run storage operations against configured volumes.
//!
//! Usage:
//!   kura --config kura.toml write docs/readme.md --input README.md
//!   kura --config kura.toml --volume bundle list docs --json
//!   echo hello | kura --config kura.toml write greeting.txt
//!
//! Remote volumes need a network connector, which this binary does not
//! ship; local, memory and archive volumes work out of the box.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kura_storage::{Options, Storage, StorageConfig};

/// Command-line access to kura storage volumes.
#[derive(Parser, Debug)]
#[command(name = "kura")]
#[command(about = "Read, write and list files on kura storage volumes")]
struct Cli {
    /// Volume configuration file (TOML)
    #[arg(short, long, default_value = "kura.toml")]
    config: PathBuf,

    /// Volume to use instead of the configured default
    #[arg(short, long)]
    volume: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a file's contents
    Read {
        name: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a file, reading stdin unless --input is given
    Write {
        name: String,
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Delete a file or a directory tree
    Delete { name: String },
    /// Check whether a file or directory exists
    Exists { name: String },
    /// List files, optionally under a prefix
    List {
        prefix: Option<String>,
        /// Print JSON instead of one line per file
        #[arg(long)]
        json: bool,
    },
    /// List configured volumes
    Volumes,
}

fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let config = StorageConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let storage = Storage::from_config(config)?;
    let opts = Options {
        config: cli.volume.as_deref(),
    };

    match cli.command {
        Command::Read { name, output } => {
            let data = storage.read(&name, opts)?;
            match output {
                Some(path) => std::fs::write(&path, &data)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => out.write_all(&data)?,
            }
        }
        Command::Write { name, input } => {
            let data = match input {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut data = Vec::new();
                    io::stdin().read_to_end(&mut data)?;
                    data
                }
            };
            let written = storage.write(&name, &data, opts)?;
            writeln!(out, "{written}")?;
        }
        Command::Delete { name } => {
            let deleted = storage.delete(&name, opts)?;
            writeln!(out, "{deleted}")?;
        }
        Command::Exists { name } => {
            let exists = storage.exists(&name, opts)?;
            writeln!(out, "{exists}")?;
        }
        Command::List { prefix, json } => {
            let files = storage.list(prefix.as_deref(), opts)?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &files)?;
                writeln!(out)?;
            } else {
                for file in &files {
                    writeln!(out, "{:>10} {:>12} {}", file.size(), file.timestamp(), file.path())?;
                }
            }
        }
        Command::Volumes => {
            for name in storage.volume_names() {
                let marker = if name == storage.default_volume() { "*" } else { " " };
                writeln!(out, "{marker} {name}")?;
            }
        }
    }

    storage.close_all()?;
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(cli, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("files")).unwrap();
        let config = format!(
            "default = \"files\"\n\n[volumes.files]\nengine = \"local\"\nroot = {:?}\n\n[volumes.bundle]\nengine = \"archive\"\nfile = {:?}\n",
            dir.path().join("files"),
            dir.path().join("bundle.zip"),
        );
        std::fs::write(dir.path().join("kura.toml"), config).unwrap();
        dir
    }

    fn kura(dir: &TempDir, args: &[&str]) -> Result<String> {
        let config = dir.path().join("kura.toml");
        let mut argv = vec!["kura", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let mut out = Vec::new();
        run(cli, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_write_read_list() {
        let dir = setup();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, b"hello").unwrap();

        let input = input.to_str().unwrap();
        assert_eq!(kura(&dir, &["write", "docs/a.txt", "--input", input]).unwrap(), "true\n");
        assert_eq!(kura(&dir, &["read", "docs/a.txt"]).unwrap(), "hello");
        assert_eq!(kura(&dir, &["exists", "docs"]).unwrap(), "true\n");

        let listing = kura(&dir, &["list", "docs", "--json"]).unwrap();
        let files: serde_json::Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(files[0]["path"], "docs/a.txt");
        assert_eq!(files[0]["size"], 5);

        assert_eq!(kura(&dir, &["delete", "docs/"]).unwrap(), "false\n");
        assert_eq!(kura(&dir, &["delete", "docs"]).unwrap(), "true\n");
        assert!(kura(&dir, &["read", "docs/a.txt"]).is_err());
    }

    #[test]
    fn test_archive_volume_persists_between_runs() {
        let dir = setup();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, b"zipped").unwrap();

        let input = input.to_str().unwrap();
        kura(&dir, &["--volume", "bundle", "write", "a/b.txt", "--input", input]).unwrap();
        assert_eq!(kura(&dir, &["--volume", "bundle", "read", "a/b.txt"]).unwrap(), "zipped");
    }

    #[test]
    fn test_volumes() {
        let dir = setup();
        assert_eq!(kura(&dir, &["volumes"]).unwrap(), "  bundle\n* files\n");
    }

    #[test]
    fn test_missing_config() {
        let dir = TempDir::new().unwrap();
        let err = kura(&dir, &["volumes"]).unwrap_err();
        assert!(err.to_string().contains("kura.toml"));
    }
}
