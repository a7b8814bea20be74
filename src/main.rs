//! Binary entrypoint for the Relay BBS CLI.
//!
//! Commands:
//! - `start` - run every enabled transport and the IRC relay until Ctrl-C / SIGTERM
//! - `init` - create a starter `config.toml`, data directory and welcome screen
//! - `status [--json]` - print user, message and relay log counts
//!
//! See the library crate docs for module-level details: `relaybbs::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::Path;

use relaybbs::bbs::BbsServer;
use relaybbs::config::Config;
use relaybbs::relay::segment::segment_path;
use relaybbs::storage::{MessageBoard, UserStore};

#[derive(Parser)]
#[command(name = "relaybbs")]
#[command(about = "A multi-transport Bulletin Board System with an IRC relay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS server
    Start,
    /// Initialize a new BBS configuration
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
    /// Show BBS status and statistics
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

const DEFAULT_WELCOME: &str = concat!(
    "\x1b[1;36m",
    "==========================================\n",
    "            R E L A Y   B B S\n",
    "==========================================\n",
    "\x1b[0m",
    "Telnet, SSH and the web, bridged to IRC.\n",
);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            info!("Starting Relay BBS v{}", env!("CARGO_PKG_VERSION"));
            info!("Transports: {}", config.enabled_transports().join(", "));

            let bbs = BbsServer::new(config).await?;
            bbs.run().await?;
        }
        Commands::Init { force } => {
            init_logging(None, cli.verbose);
            if Path::new(&cli.config).exists() && !force {
                warn!(
                    "{} already exists; use --force to overwrite it",
                    cli.config
                );
            } else {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
            }

            let config = Config::load(&cli.config).await?;
            tokio::fs::create_dir_all(&config.storage.data_dir)
                .await
                .with_context(|| format!("creating {}", config.storage.data_dir))?;
            info!("Data directory {}", config.storage.data_dir);

            let welcome = Path::new(&config.bbs.welcome_screen);
            if !welcome.exists() {
                tokio::fs::write(welcome, DEFAULT_WELCOME)
                    .await
                    .with_context(|| format!("writing {}", welcome.display()))?;
                info!("Welcome screen created at {}", welcome.display());
            }
        }
        Commands::Status { json } => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            show_status(&config, json).await?;
        }
    }

    Ok(())
}

async fn show_status(config: &Config, json: bool) -> Result<()> {
    let db_path = config.storage.user_db_path();
    let users = if db_path.exists() {
        UserStore::open(&db_path, config.security.argon2_params()?)?
            .user_count()
            .await?
    } else {
        0
    };

    let board_path = config.storage.message_board_path();
    let messages = if board_path.exists() {
        MessageBoard::open(&board_path).await?.message_count().await?
    } else {
        0
    };

    let today = chrono::Local::now().date_naive();
    let segment = segment_path(Path::new(&config.relay.log_dir), today);
    let relay_lines = match tokio::fs::read_to_string(&segment).await {
        Ok(content) => content.lines().count(),
        Err(_) => 0,
    };

    if json {
        let payload = serde_json::json!({
            "name": config.bbs.name,
            "users": users,
            "messages": messages,
            "relay_enabled": config.relay.enabled,
            "relay_lines_today": relay_lines,
            "transports": config.enabled_transports(),
        });
        println!("{}", payload);
    } else {
        println!("{}", config.bbs.name);
        println!("  users:              {}", users);
        println!("  board messages:     {}", messages);
        println!(
            "  relay:              {}",
            if config.relay.enabled {
                format!("{} ({})", config.relay.server, config.relay.nick)
            } else {
                "disabled".to_string()
            }
        );
        println!("  relay lines today:  {} ({})", relay_lines, segment.display());
        println!("  transports:         {}", config.enabled_transports().join(", "));
    }
    Ok(())
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let open_append = |path: &str| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(|f| Arc::new(Mutex::new(f)))
    };
    let log_file = config
        .and_then(|c| c.logging.file.as_deref())
        .and_then(|p| open_append(p).ok());
    let security_file = config
        .and_then(|c| c.logging.security_file.as_deref())
        .and_then(|p| open_append(p).ok());

    // Console output only when attached to a terminal, or when there is no log file
    let to_console = log_file.is_none() || atty::is(atty::Stream::Stdout);

    builder.format(move |fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let line = format!("{} [{}] {}", ts, record.level(), record.args());

        if let Some(file) = &log_file {
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
        }
        if record.target() == "security" {
            if let Some(file) = &security_file {
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
            }
        }

        if to_console {
            writeln!(fmt, "{}", line)
        } else {
            Ok(())
        }
    });
    let _ = builder.try_init();
}
