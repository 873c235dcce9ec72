//! The single implicit chat room.

use std::fmt;

/// Static facts about the room, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub name: String,
    pub port: u16,
}

impl RoomInfo {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Point-in-time view of the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    pub name: String,
    pub port: u16,
    pub connected: usize,
    pub history_len: usize,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "room '{}' on port {}: {} connected, {} messages in history",
            self.name, self.port, self.connected, self.history_len
        )
    }
}
