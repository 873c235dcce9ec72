//! Interactive chat session with reconnection support.

use std::{sync::Arc, time::Duration};

use parlor_shared::protocol::{Command, Credentials};
use tokio::sync::mpsc;

use crate::{
    auth::AuthClient,
    config::ClientConfig,
    engine::{ChatClient, ClientEvent},
    error::ClientError,
    heartbeat::spawn_heartbeat,
    transfer::{SideChannel, TransferSlots},
    ui::{HELP, Input, redisplay_prompt, show_event, spawn_readline},
};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_INTERVAL_SECS: u64 = 5;

/// Whether another connection attempt should be made after `error`.
pub fn should_attempt_reconnect(error: &ClientError, attempt: u32, max_attempts: u32) -> bool {
    if matches!(error, ClientError::Tls(_)) {
        return false;
    }
    attempt < max_attempts
}

/// Check credentials on a guest probe connection.
pub async fn run_login(config: &ClientConfig, credentials: &Credentials) -> Result<(), ClientError> {
    let auth = AuthClient::new(
        config.transport.clone(),
        config.host.clone(),
        config.port,
        config.reply_timeout,
    );
    let reply = auth.login(credentials).await?;
    if reply.is_success() {
        tracing::info!("Login as '{}': {}", credentials.username, reply);
    } else {
        tracing::warn!("Login as '{}' refused: {}", credentials.username, reply);
    }
    println!("{}", reply);
    Ok(())
}

/// Create an account on a guest probe connection.
pub async fn run_register(config: &ClientConfig, credentials: &Credentials) -> Result<(), ClientError> {
    let auth = AuthClient::new(
        config.transport.clone(),
        config.host.clone(),
        config.port,
        config.reply_timeout,
    );
    let reply = auth.register(credentials).await?;
    if reply.is_success() {
        tracing::info!("Registration of '{}': {}", credentials.username, reply);
    } else {
        tracing::warn!("Registration of '{}' refused: {}", credentials.username, reply);
    }
    println!("{}", reply);
    Ok(())
}

/// Chat as `username` until the user quits, reconnecting on lost connections.
pub async fn run_chat(config: ClientConfig, username: String) -> Result<(), ClientError> {
    let mut reconnect_count = 0;
    // One reader for the whole run; it outlives reconnects.
    let mut input = spawn_readline(username.clone());

    loop {
        tracing::info!(
            "Attempting to connect to {}:{} over {} as '{}' (attempt {}/{})",
            config.host,
            config.port,
            if config.transport.is_tls() { "TLS" } else { "plain TCP" },
            username,
            reconnect_count + 1,
            MAX_RECONNECT_ATTEMPTS
        );

        match run_session(&config, &username, &mut input).await {
            Ok(()) => {
                tracing::info!("Client session ended normally");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Connection lost: {}", e);
                reconnect_count += 1;

                if !should_attempt_reconnect(&e, reconnect_count, MAX_RECONNECT_ATTEMPTS) {
                    tracing::error!(
                        "Failed to reconnect after {} attempts. Exiting.",
                        reconnect_count
                    );
                    return Err(e);
                }

                tracing::info!(
                    "Reconnecting in {} seconds... (attempt {}/{})",
                    RECONNECT_INTERVAL_SECS,
                    reconnect_count + 1,
                    MAX_RECONNECT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(RECONNECT_INTERVAL_SECS)).await;
            }
        }
    }
}

/// One control connection, from join to quit or loss.
async fn run_session(
    config: &ClientConfig,
    username: &str,
    input: &mut mpsc::UnboundedReceiver<String>,
) -> Result<(), ClientError> {
    let (client, mut events) = ChatClient::connect(
        &config.transport,
        &config.host,
        config.port,
        username,
        config.download_dir.clone(),
    )
    .await?;
    let client = Arc::new(client);
    let side = SideChannel::new(
        config.transport.clone(),
        config.host.clone(),
        client.username(),
        Arc::new(TransferSlots::new(config.port)),
    );

    println!(
        "\nWelcome to '{}'. You are '{}'. {}\n",
        client.room(),
        client.username(),
        HELP
    );
    let heartbeat = spawn_heartbeat(client.clone(), config.heartbeat_interval);

    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Closed) | None => break Err(ClientError::Closed),
                Some(event) => show_event(&event, client.username()),
            },
            line = input.recv() => {
                let Some(line) = line else { break Ok(()) };
                match Input::parse(&line) {
                    Input::Quit => break Ok(()),
                    other => {
                        if let Err(e) = handle_input(&client, &side, config, other).await {
                            if e.is_connection_lost() {
                                break Err(e);
                            }
                            println!("\n{}", e);
                        }
                    }
                }
                redisplay_prompt(client.username());
            }
        }
    };

    heartbeat.abort();
    if result.is_ok() {
        client.disconnect().await;
    }
    result
}

async fn handle_input(
    client: &Arc<ChatClient>,
    side: &SideChannel,
    config: &ClientConfig,
    input: Input,
) -> Result<(), ClientError> {
    match input {
        Input::Chat(text) => match Command::parse(&text) {
            Ok(Command::Chat(_)) => client.speak(&text).await,
            // Text the server would read as a command is not sent as chat.
            _ => {
                println!("\n'{}' is a protocol command. {}", text, HELP);
                Ok(())
            }
        },
        Input::Upload(path, kind) => {
            let side = side.clone();
            tokio::spawn(async move {
                match side.upload(&path, kind).await {
                    Ok(sent) => tracing::info!("Uploaded {} ({} bytes)", path.display(), sent),
                    Err(e) => tracing::warn!("Upload of {} failed: {}", path.display(), e),
                }
            });
            Ok(())
        }
        Input::Download(target) => client.request_download(&target).await,
        Input::Fetch(id) => {
            let side = side.clone();
            let dir = config.download_dir.clone();
            tokio::spawn(async move {
                match side.download(id, &dir).await {
                    Ok((path, length)) => {
                        println!("\nSaved {} ({} bytes)", path.display(), length)
                    }
                    Err(e) => println!("\nFetch of attachment {} failed: {}", id, e),
                }
            });
            Ok(())
        }
        Input::Invalid(reason) => {
            println!("\n{}", reason);
            Ok(())
        }
        Input::Quit => Ok(()),
    }
}
