//! Server execution logic.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parlor_shared::{
    protocol::ADMIN,
    time::{Clock, SystemClock},
};
use tokio::{net::TcpListener, task::JoinHandle};

use crate::{
    config::ServerConfig,
    domain::{AccountStore, RoomInfo},
    error::ServerError,
    infrastructure::{
        ConnectionRegistry, FileStorage,
        transport::{Acceptor, load_tls_config},
    },
    usecase::{
        ConnectParticipantUseCase, DisconnectParticipantUseCase, LoginUserUseCase,
        RegisterUserUseCase, SendMessageUseCase, TransferFileUseCase,
    },
};

use super::{
    handler::{handle_control_connection, handle_side_connection},
    signal::shutdown_signal,
    state::AppState,
};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelRole {
    Control,
    Side,
}

/// Parlor chat server
///
/// # Example
///
/// ```ignore
/// let accounts = Arc::new(InMemoryAccountStore::new());
/// let server = Server::new(ServerConfig::default(), accounts);
/// server.run().await?;
/// ```
pub struct Server {
    config: ServerConfig,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl Server {
    pub fn new(config: ServerConfig, accounts: Arc<dyn AccountStore>) -> Self {
        Self::with_clock(config, accounts, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ServerConfig,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            accounts,
            clock,
        }
    }

    /// Bind the control port and the side-channel pool and start accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS material cannot be loaded, the storage
    /// directories cannot be created, or any of the ports cannot be bound.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let config = self.config;

        let acceptor = match &config.tls {
            Some(paths) => Acceptor::tls(Arc::new(load_tls_config(&paths.cert, &paths.key)?)),
            None => Acceptor::plain(),
        };

        let storage = Arc::new(FileStorage::new(
            config.files_dir.clone(),
            config.staging_dir.clone(),
            self.clock.clone(),
        ));
        storage.prepare().await?;

        let registry = Arc::new(ConnectionRegistry::new(
            RoomInfo::new(config.room.clone(), config.port),
            config.history_capacity,
            self.accounts.clone(),
        ));

        let app_state = Arc::new(AppState {
            connect_participant_usecase: Arc::new(ConnectParticipantUseCase::new(
                registry.clone(),
                config.replay_history,
            )),
            disconnect_participant_usecase: Arc::new(DisconnectParticipantUseCase::new(
                registry.clone(),
            )),
            send_message_usecase: Arc::new(SendMessageUseCase::new(registry.clone())),
            register_user_usecase: Arc::new(RegisterUserUseCase::new(
                self.accounts.clone(),
                registry.clone(),
            )),
            login_user_usecase: Arc::new(LoginUserUseCase::new(self.accounts.clone())),
            transfer_file_usecase: Arc::new(TransferFileUseCase::new(
                registry.clone(),
                self.accounts.clone(),
                storage,
            )),
            heartbeat: config.heartbeat,
        });

        let control = bind(&config.host, config.port).await?;
        let local_addr = control.local_addr()?;
        let mut side_listeners = Vec::with_capacity(config.side_channels as usize);
        for port in config.side_channel_ports() {
            side_listeners.push(bind(&config.host, port).await?);
        }
        let side_ports = side_listeners
            .iter()
            .map(|listener| listener.local_addr().map(|addr| addr.port()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut accept_tasks = Vec::with_capacity(side_listeners.len() + 1);
        accept_tasks.push(tokio::spawn(accept_loop(
            control,
            acceptor.clone(),
            app_state.clone(),
            ChannelRole::Control,
        )));
        for listener in side_listeners {
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                acceptor.clone(),
                app_state.clone(),
                ChannelRole::Side,
            )));
        }

        tracing::info!(
            "Parlor chat server '{}' listening on {} ({})",
            config.room,
            local_addr,
            if acceptor.is_tls() { "TLS" } else { "plain TCP" }
        );
        tracing::info!("Side-channel ports: {:?}", side_ports);

        Ok(ServerHandle {
            registry,
            accept_tasks,
            local_addr,
            side_ports,
            grace: config.shutdown_grace,
        })
    }

    /// Run the server until Ctrl+C or SIGTERM, then shut down gracefully.
    pub async fn run(self) -> Result<(), ServerError> {
        let handle = self.start().await?;
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        shutdown_signal().await;
        handle.shutdown().await;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// A running server
pub struct ServerHandle {
    registry: Arc<ConnectionRegistry>,
    accept_tasks: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
    side_ports: Vec<u16>,
    grace: Duration,
}

impl ServerHandle {
    /// Address of the control-channel listener
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn side_channel_ports(&self) -> &[u16] {
        &self.side_ports
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stop accepting, warn the room, wait the grace period, then close every session.
    pub async fn shutdown(self) {
        for task in &self.accept_tasks {
            task.abort();
        }

        self.registry
            .broadcast(ADMIN, "The chatroom is about to close")
            .await;
        tokio::time::sleep(self.grace).await;

        let closed = self.registry.close_all().await;
        tracing::info!("Closed {} connections", closed);
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Acceptor,
    state: Arc<AppState>,
    role: ChannelRole,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept a {:?} connection: {}", role, e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let setup = tokio::time::timeout(state.handshake_timeout(), acceptor.accept(stream));
            let stream = match setup.await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::debug!("Connection from {} dropped during setup: {}", peer, e);
                    return;
                }
                Err(_) => {
                    tracing::info!("Connection from {} did not finish setup in time", peer);
                    return;
                }
            };
            match role {
                ChannelRole::Control => handle_control_connection(stream, peer, state).await,
                ChannelRole::Side => handle_side_connection(stream, peer, state).await,
            }
        });
    }
}
