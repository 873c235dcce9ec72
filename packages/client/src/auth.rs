//! Login and registration probes.
//!
//! Each probe opens a short-lived guest connection, speaks one credential
//! line, waits for the reply token and disconnects.

use std::time::Duration;

use parlor_shared::protocol::{AuthReply, Command, Credentials, GUEST};

use crate::{engine::ChatClient, error::ClientError, transport::Transport};

/// Connects as a guest just long enough to check or create credentials.
pub struct AuthClient {
    transport: Transport,
    host: String,
    port: u16,
    wait: Duration,
}

impl AuthClient {
    pub fn new(transport: Transport, host: impl Into<String>, port: u16, wait: Duration) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
            wait,
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthReply, ClientError> {
        self.probe(Command::Login(credentials.clone())).await
    }

    pub async fn register(&self, credentials: &Credentials) -> Result<AuthReply, ClientError> {
        self.probe(Command::Register(credentials.clone())).await
    }

    async fn probe(&self, command: Command) -> Result<AuthReply, ClientError> {
        let (client, _events) = ChatClient::connect(
            &self.transport,
            &self.host,
            self.port,
            GUEST,
            std::env::temp_dir(),
        )
        .await?;
        let reply = client.speak_and_await(&command.to_line(), self.wait).await;
        client.disconnect().await;
        reply
    }
}
