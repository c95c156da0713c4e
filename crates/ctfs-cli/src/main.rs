//! ctfs: cryptree filesystem CLI
//!
//! Every command except `init` and `config show` takes a capability link
//! (`#owner/writer/mapKey/readKey[/writeKey]`). A writable directory link is
//! all that is needed to change that directory: the signing identity is
//! recovered from the directory node itself.
//!
//! Commands:
//!   init                    - create a root directory, print its writable link
//!   mkdir <dir> <name>      - create a subdirectory, print its link
//!   put <dir> <local>       - upload a local file into a directory
//!   cat <file>              - stream a file to stdout (or --output)
//!   ls <dir>                - list a directory
//!   mv <dir> <from> <to>    - rename a child
//!   rm <dir> <name>         - remove a child and everything under it
//!   status                  - check the storage backend
//!   config show             - display current configuration

mod local;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ctfs_chunks::MAX_CHUNK_SIZE;
use ctfs_core::config::{expand_tilde, CtfsConfig};
use ctfs_crypto::SigningIdentity;
use ctfs_fs::{read_exact, AbsoluteCapability, AsyncReader, FileSystem, Network, ProgressFn};
use ctfs_storage::{build_operator, check_health, OpendalBlockStore, OpendalPointerStore};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::local::LocalFileReader;

type Fs = FileSystem<OpendalBlockStore, OpendalPointerStore>;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ctfs",
    version,
    about = "Cryptree encrypted filesystem client",
    long_about = "ctfs: store files as encrypted, chunked cryptree nodes reachable only through capability links"
)]
struct Cli {
    /// Path to ctfs.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CTFS_CONFIG",
        default_value = "~/.config/ctfs/config.toml"
    )]
    config: PathBuf,

    /// Storage root (overrides [storage].root)
    #[arg(long, env = "CTFS_STORE")]
    store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to [logging].level
    #[arg(long, env = "CTFS_LOG")]
    log: Option<String>,

    /// Log format; defaults to [logging].format
    #[arg(long, env = "CTFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new root directory and print its writable link
    Init {
        /// Name of the root directory
        #[arg(long, default_value = "root")]
        name: String,
    },

    /// Create a subdirectory
    Mkdir {
        /// Link of the containing directory
        dir: String,
        name: String,
    },

    /// Upload a local file into a directory
    Put {
        /// Link of the target directory
        dir: String,
        /// Local file to upload
        local: PathBuf,
        /// Name in the directory (default: the local file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
        /// Replace an existing child of the same name instead of renaming
        #[arg(long)]
        overwrite: bool,
    },

    /// Write a file's contents to stdout
    Cat {
        /// Link of the file
        file: String,
        /// Write to this path instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// List a directory
    Ls {
        /// Link of the directory
        dir: String,
        /// Also print each child's link
        #[arg(long)]
        links: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Rename a child of a directory
    Mv {
        dir: String,
        from: String,
        to: String,
    },

    /// Remove a child and everything under it
    Rm { dir: String, name: String },

    /// Check that the storage backend answers
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut config = CtfsConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;
    if let Some(store) = &cli.store {
        config.storage.root = store.clone();
    }

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        backend = %config.storage.backend,
        "ctfs starting"
    );

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Status => cmd_status(&config).await,
        Commands::Init { name } => cmd_init(&open_fs(&config)?, &name).await,
        Commands::Mkdir { dir, name } => cmd_mkdir(&open_fs(&config)?, &dir, &name).await,
        Commands::Put { dir, local, name, overwrite } => {
            cmd_put(&open_fs(&config)?, &dir, &local, name.as_deref(), overwrite).await
        }
        Commands::Cat { file, output } => {
            cmd_cat(&open_fs(&config)?, &file, output.as_deref()).await
        }
        Commands::Ls { dir, links, json } => cmd_ls(&open_fs(&config)?, &dir, links, json).await,
        Commands::Mv { dir, from, to } => {
            let fs = open_fs(&config)?;
            let dir = parse_link(&dir)?;
            fs.rename_child(&dir, &from, &to)
                .await
                .with_context(|| format!("renaming {from:?} to {to:?}"))?;
            println!("{from} -> {to}");
            Ok(())
        }
        Commands::Rm { dir, name } => {
            let fs = open_fs(&config)?;
            let dir = parse_link(&dir)?;
            fs.remove_child(&dir, &name)
                .await
                .with_context(|| format!("removing {name:?}"))?;
            println!("removed {name}");
            Ok(())
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Storage ───────────────────────────────────────────────────────────────────

fn open_fs(config: &CtfsConfig) -> Result<Fs> {
    let op = build_operator(&config.storage).context("building storage operator")?;
    let network = Network::new(OpendalBlockStore::new(op.clone()), OpendalPointerStore::new(op));
    FileSystem::new(network, config).context("invalid [upload] settings")
}

fn parse_link(link: &str) -> Result<AbsoluteCapability> {
    AbsoluteCapability::from_link(link.trim()).with_context(|| format!("parsing link {link:?}"))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .context("progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

// ── `ctfs init` / `mkdir` ─────────────────────────────────────────────────────

async fn cmd_init(fs: &Fs, name: &str) -> Result<()> {
    let signer = SigningIdentity::generate();
    let root = fs
        .create_root(&signer, name)
        .await
        .context("creating root directory")?;
    info!(writer = %signer.public_key_hash(), "new writer identity");
    println!("{}", root.to_link());
    eprintln!("Keep this link secret: it grants write access to {name:?}.");
    eprintln!("Read-only link: {}", root.read_only().to_link());
    Ok(())
}

async fn cmd_mkdir(fs: &Fs, dir: &str, name: &str) -> Result<()> {
    let dir = parse_link(dir)?;
    let child = fs
        .mkdir(&dir, name)
        .await
        .with_context(|| format!("creating directory {name:?}"))?;
    let props = fs.properties(&child).await?;
    if props.name != name {
        eprintln!("{name:?} was taken; created {:?}", props.name);
    }
    println!("{}", child.to_link());
    Ok(())
}

// ── `ctfs put` ────────────────────────────────────────────────────────────────

async fn cmd_put(
    fs: &Fs,
    dir: &str,
    local: &Path,
    name: Option<&str>,
    overwrite: bool,
) -> Result<()> {
    let dir = parse_link(dir)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("{} has no file name", local.display()))?,
    };
    let reader = LocalFileReader::open(local)
        .await
        .with_context(|| format!("opening {}", local.display()))?;
    let size = reader.size();

    let pb = make_progress_bar(size, "put")?;
    pb.set_message(name.clone());
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
    });

    let exists = overwrite && fs.get_child(&dir, &name).await.is_ok();
    let (linked, uploaded) = if exists {
        let uploaded = fs
            .overwrite_file(&dir, &name, reader, size, Some(progress))
            .await
            .with_context(|| format!("overwriting {name:?}"))?;
        (name.clone(), uploaded)
    } else {
        fs.upload_file(&dir, &name, reader, size, Some(progress))
            .await
            .with_context(|| format!("uploading {}", local.display()))?
    };
    pb.finish_with_message("done".to_string());

    println!("  name:    {linked}");
    println!("  chunks:  {}", uploaded.chunks);
    println!("  bytes:   {}", HumanBytes(size));
    println!(
        "  root:    {}",
        hex::encode(uploaded.hash_tree.root_hash())
    );
    println!("  link:    {}", uploaded.capability.to_link());
    Ok(())
}

// ── `ctfs cat` ────────────────────────────────────────────────────────────────

async fn cmd_cat(fs: &Fs, file: &str, output: Option<&Path>) -> Result<()> {
    let cap = parse_link(file)?;
    let mut reader = fs.open_buffered(&cap).await.context("opening file")?;
    let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut remaining = reader.size();
    while remaining > 0 {
        let step = remaining.min(MAX_CHUNK_SIZE as u64) as usize;
        let piece = read_exact(&mut reader, step).await.context("reading file")?;
        out.write_all(&piece).await.context("writing output")?;
        remaining -= step as u64;
    }
    out.flush().await.context("flushing output")?;
    reader.close();
    Ok(())
}

// ── `ctfs ls` ─────────────────────────────────────────────────────────────────

async fn cmd_ls(fs: &Fs, dir: &str, links: bool, json: bool) -> Result<()> {
    let dir = parse_link(dir)?;
    let mut entries = fs.list(&dir).await.context("listing directory")?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        let rendered: Vec<_> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.name,
                    "dir": entry.is_dir,
                    "size": entry.properties.size,
                    "modified": entry.properties.modified,
                    "link": links.then(|| entry.capability.to_link()),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rendered).context("rendering JSON")?
        );
        return Ok(());
    }

    for entry in &entries {
        let kind = if entry.is_dir { "d" } else { "-" };
        let size = if entry.is_dir {
            "-".to_string()
        } else {
            HumanBytes(entry.properties.size).to_string()
        };
        if links {
            println!(
                "{kind} {size:>10}  {}  {}",
                entry.name,
                entry.capability.to_link()
            );
        } else {
            println!("{kind} {size:>10}  {}", entry.name);
        }
    }
    Ok(())
}

// ── `ctfs status` / `config show` ─────────────────────────────────────────────

async fn cmd_status(config: &CtfsConfig) -> Result<()> {
    let op = build_operator(&config.storage).context("building storage operator")?;
    println!("backend: {}", config.storage.backend);
    if config.storage.backend == "fs" {
        println!("root:    {}", expand_tilde(&config.storage.root).display());
    }
    check_health(&op).await?;
    println!("storage: ok");
    Ok(())
}

fn cmd_config_show(config: &CtfsConfig, config_path: &Path) -> Result<()> {
    let source = if config_path.exists() {
        config_path.display().to_string()
    } else {
        format!("built-in defaults ({} not found)", config_path.display())
    };
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    println!("# source: {source}");
    println!("# store:  {}\n", expand_tilde(&config.storage.root).display());
    print!("{rendered}");
    Ok(())
}
