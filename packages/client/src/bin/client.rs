//! Parlor chat client.
//!
//! Run with:
//! ```not_rust
//! parlor-client chat alice
//! parlor-client --port 9000 login alice secret
//! parlor-client register bob hunter2
//! parlor-client --ca-file certs/cert.pem --server-name localhost chat alice
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};

use parlor_client::{
    ClientConfig, Transport,
    runner::{run_chat, run_login, run_register},
};
use parlor_shared::{logger::setup_logger, protocol::Credentials};

#[derive(Parser, Debug)]
#[command(name = "parlor-client")]
#[command(about = "Line-oriented chat client with side-channel file transfer", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Control port; side-channels use the ports right above it
    #[arg(short = 'p', long, default_value_t = 9000)]
    port: u16,

    /// CA certificate (PEM) to trust; enables TLS
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Name to verify the server certificate against
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Directory for downloaded files
    #[arg(long, default_value = "downloads")]
    download_dir: PathBuf,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 20)]
    heartbeat_secs: u64,

    /// Seconds to wait for a login or registration reply
    #[arg(long, default_value_t = 10)]
    reply_timeout_secs: u64,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Join the room and chat
    Chat {
        /// Name shown to others; omit to join as Guest
        #[arg(default_value = "")]
        username: String,
    },
    /// Check a username and password
    Login { username: String, password: String },
    /// Create an account
    Register { username: String, password: String },
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let transport = match &args.ca_file {
        Some(ca_file) => match Transport::tls(ca_file, &args.server_name) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("Failed to set up TLS: {}", e);
                std::process::exit(1);
            }
        },
        None => Transport::plain(),
    };
    let mut config = ClientConfig::new(args.host, args.port, transport);
    config.download_dir = args.download_dir;
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_secs);
    config.reply_timeout = Duration::from_secs(args.reply_timeout_secs);

    let result = match args.command {
        Action::Chat { username } => run_chat(config, username).await,
        Action::Login { username, password } => {
            run_login(&config, &Credentials { username, password }).await
        }
        Action::Register { username, password } => {
            run_register(&config, &Credentials { username, password }).await
        }
    };

    if let Err(e) = result {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
