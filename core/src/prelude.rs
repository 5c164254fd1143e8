use serde::{Deserialize, Serialize};

/// Number of virtual channels addressable in one configuration buffer.
pub const MAX_VIRTUAL_CHANNELS: usize = 1024;

/// Identifies a single packet handled by the corner turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketCoordinate {
    pub integration: u32,
    /// Corner-turn frame within the integration, 0..3.
    pub frame: u8,
    /// Packet within the frame, 0..75. Packets 0..11 are preload.
    pub packet: u8,
    pub virtual_channel: u32,
}

impl PacketCoordinate {
    pub fn new(integration: u32, frame: u8, packet: u8, virtual_channel: u32) -> Self {
        Self {
            integration,
            frame,
            packet,
            virtual_channel,
        }
    }
}

/// Common error type for the reference model.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("virtual channel {0} outside [0, {})", MAX_VIRTUAL_CHANNELS)]
    ChannelRange(u32),
    #[error("virtual channel {0} configured more than once")]
    DuplicateChannel(u32),
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("configuration lookup for virtual channel {channel} found {matches} entries")]
    ConfigLookup { channel: u32, matches: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;
