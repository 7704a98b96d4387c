use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ktserve::auth::{SessionRpc, SessionStore, KEY_LEN};
use ktserve::cipher;
use ktserve::config::Config;
use ktserve::gateway::{self, Gateway};
use ktserve::logging;
use ktserve::runner::NativeRunner;

#[derive(Parser)]
#[command(name = "ktserve")]
#[command(version)]
#[command(about = "Static files, CGI commands and encrypted sessions over one TCP port")]
struct Cli {
    /// Configuration file (default: <config dir>/ktserve/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server until its stop code arrives
    Serve,
    /// Send the stop code to a running server
    Stop {
        /// Port of the running server (default: configured port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Key utilities
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user or replace its password and level
    Set {
        id: String,
        password: String,
        #[arg(long, default_value = "1")]
        level: String,
    },
    /// List user ids and levels
    List,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Print the key derived from a seed
    Derive {
        seed: String,
        #[arg(long, default_value_t = KEY_LEN)]
        len: usize,
    },
    /// Print a random key
    Gen {
        #[arg(long, default_value_t = KEY_LEN)]
        len: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Key { action } = &cli.command {
        match action {
            KeyAction::Derive { seed, len } => println!("{}", cipher::derive_key(seed, *len)),
            KeyAction::Gen { len } => println!("{}", cipher::generate_key(*len)),
        }
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.log.level);

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Stop { port } => {
            let port = port.unwrap_or(config.server.port);
            let stop_code = config.server.require_stop_code()?;
            gateway::stop(port, stop_code)
                .await
                .with_context(|| format!("No server answered on port {port}"))?;
            println!("Stop code sent to port {port}");
            Ok(())
        }
        Commands::User { action } => {
            let store = SessionStore::initialize(&config.store)?;
            match action {
                UserAction::Set {
                    id,
                    password,
                    level,
                } => {
                    store.put_user(&id, &password, &level)?;
                    println!("User '{id}' saved with level {level}");
                }
                UserAction::List => {
                    for user in store.users()? {
                        println!("{}\t{}", user.id, user.level);
                    }
                }
            }
            Ok(())
        }
        Commands::Key { .. } => Ok(()),
    }
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;

    let store = Arc::new(SessionStore::initialize(&config.store)?);
    let handler = Arc::new(SessionRpc::new(store, &config.server.app_name));
    let gateway = Gateway::new(config.server.clone(), handler, Arc::new(NativeRunner));

    println!(
        "ktserve listening on port {} (web root {})",
        config.server.port,
        config.server.web_root().display()
    );
    gateway.start().await?;
    Ok(())
}
