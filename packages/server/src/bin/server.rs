//! Parlor chat server.
//!
//! Relays chat lines to everyone in the room, answers `Register` / `Login`
//! probes and accepts file transfers on the side-channel ports.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin parlor-server
//! cargo run --bin parlor-server -- --host 0.0.0.0 --port 9000 --room Lobby
//! cargo run --bin parlor-server -- --generate-cert --cert-dir ./certs
//! cargo run --bin parlor-server -- --cert ./certs/cert.pem --key ./certs/key.pem
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use parlor_server::{
    CliOverrides, Server, ServerConfig, infrastructure::InMemoryAccountStore,
    infrastructure::transport::generate_self_signed_cert,
};
use parlor_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "parlor-server")]
#[command(about = "Line-oriented chat server with side-channel file transfer", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Control-channel port; side-channels use the ports right after it
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Room name sent to every client on join
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// Number of side-channel listeners
    #[arg(long)]
    side_channels: Option<u16>,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// PEM certificate chain (enables TLS together with --key)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long)]
    key: Option<PathBuf>,

    /// Generate a self-signed development certificate and use it
    #[arg(long)]
    generate_cert: bool,

    /// Directory for --generate-cert output
    #[arg(long, default_value = "./certs")]
    cert_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let (cert, key) = if args.generate_cert {
        match generate_self_signed_cert(&args.cert_dir) {
            Ok((cert, key)) => {
                tracing::info!(
                    "Generated self-signed certificate {} and key {}",
                    cert.display(),
                    key.display()
                );
                (Some(cert), Some(key))
            }
            Err(e) => {
                tracing::error!("Failed to generate certificate: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        (args.cert, args.key)
    };

    let overrides = CliOverrides {
        host: args.host,
        port: args.port,
        room: args.room,
        side_channels: args.side_channels,
        cert,
        key,
    };
    let config = match ServerConfig::load(args.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let accounts = Arc::new(InMemoryAccountStore::new());
    let server = Server::new(config, accounts);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
