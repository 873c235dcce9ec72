//! Resolved client settings.

use std::{path::PathBuf, time::Duration};

use crate::{heartbeat::HEARTBEAT_INTERVAL, transport::Transport};

/// Default wait for a login or registration reply
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how the client connects
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    /// Control port `P`; side-channels are `P + slot`
    pub port: u16,
    pub transport: Transport,
    pub download_dir: PathBuf,
    pub heartbeat_interval: Duration,
    pub reply_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            download_dir: PathBuf::from("downloads"),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reply_timeout: REPLY_TIMEOUT,
        }
    }
}
