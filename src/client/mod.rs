//! Protocol client for the module's AT command set.
//!
//! [`Client`] is the single owned context for one module.  It holds the
//! transport, the tick source, a scratch response buffer reused by every
//! exchange, and the subscribe and publish topic tables.
//!
//! The client is split across several files, each adding methods to
//! [`Client`]:
//! - `engine` - keyword scanning, command/response exchanges, `init`, `poll`
//!   and connectivity state requests
//! - `dispatch` - handling of unsolicited notifications
//! - `topics` - subscribe and publish topic lifecycle
//! - `firmware` - host firmware availability, details and chunk reads
//!
//! All methods take `&mut self`, so the client can only be driven from one
//! place at a time.  Callbacks are plain function pointers handed borrowed
//! data, so they cannot reach back into the client while it is dispatching.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

mod dispatch;
mod engine;
mod firmware;
mod parse;
mod topics;

pub use engine::{Client, time_left};
pub use firmware::MAX_READ_CHUNK;

use core::fmt::Write;
use core::ops::BitOr;

use crate::{Error, Result};

/// Size of the scratch response buffer.  256 is normally sufficient.
pub const RESPONSE_BUF_SIZE: usize = 256;

/// Maximum length of a formatted command, including the terminator
pub const CMD_SIZE: usize = 256;

/// Number of subscribe topic slots
pub const MAX_SUB_TOPICS: usize = 8;

/// Number of publish topic slots
pub const MAX_PUB_TOPICS: usize = 8;

/// Link baud rate the module starts at
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Default wait for a command's reply: 300 ms plus margin
pub const TOUT_COMMAND: u32 = 350;

/// Wait for a firmware chunk read: 500 ms plus margin
pub const TOUT_FIRMWARE_READ: u32 = 550;

/// Wait for the module to report ready after init
pub const TOUT_READY: u32 = 15_000;

/// Shortest wait ever used for a reply
pub const MIN_TIMEOUT_MS: u32 = 100;

/// Topic open/close error code meaning "already in that state".  Seen after
/// the host restarts while the module keeps its topics, so treated as
/// success.
pub const ALREADY_IN_STATE: i32 = -2;

/// Runtime configuration for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Link baud rate, used to derive the minimum reply timeout
    pub baud_rate: u32,
    /// Floor for every reply timeout
    pub min_timeout_ms: u32,
    /// Reply timeout used when a caller passes 0, and by [`Client::poll`]
    pub command_timeout_ms: u32,
    /// How long [`Client::init`] waits for the module's ready marker
    pub ready_timeout_ms: u32,
    /// How long a topic may stay opening or closing before it is marked
    /// as failed.  `None` waits forever.
    pub pending_timeout_ms: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUDRATE,
            min_timeout_ms: MIN_TIMEOUT_MS,
            command_timeout_ms: TOUT_COMMAND,
            ready_timeout_ms: TOUT_READY,
            pending_timeout_ms: Some(30_000),
        }
    }
}

impl ClientConfig {
    /// Shortest timeout any scan may use: the configured floor, or the time
    /// to fill the response buffer at the link rate (10 bits per byte), if
    /// longer.
    pub fn min_timeout(&self) -> u32 {
        let baud = u64::from(self.baud_rate.max(1));
        let fill_ms = (RESPONSE_BUF_SIZE as u64 * 10 * 1000).div_ceil(baud);
        self.min_timeout_ms.max(fill_ms as u32)
    }
}

/// Connectivity state reported by the module
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Unknown,
    Idle,
    WaitKeys,
    NetworkStart,
    SslStart,
    SslConnected,
    MqttStart,
    MqttReady,
    MqttSubscribed,
    UdpActive,
    Error,
}

impl From<i32> for LinkState {
    fn from(value: i32) -> Self {
        match value {
            0 => LinkState::Idle,
            1 => LinkState::WaitKeys,
            2 => LinkState::NetworkStart,
            3 => LinkState::SslStart,
            4 => LinkState::SslConnected,
            5 => LinkState::MqttStart,
            6 => LinkState::MqttReady,
            7 => LinkState::MqttSubscribed,
            8 => LinkState::UdpActive,
            9 => LinkState::Error,
            _ => LinkState::Unknown,
        }
    }
}

/// Marker notifications seen since [`Client::init`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Notifications(u8);

impl Notifications {
    pub const NONE: Self = Self(0);
    /// `+ETM:IDLE` - module ready for commands
    pub const READY: Self = Self(1 << 0);
    /// `+ETM:EMQRDY` - MQTT subsystem ready
    pub const MQTT_READY: Self = Self(1 << 1);
    /// `+ETM:EURDY` - UDP subsystem ready
    pub const UDP_READY: Self = Self(1 << 2);

    /// Whether every notification in `other` has been seen
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Notifications {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Subscribe topic lifecycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    #[default]
    NotInUse,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Error,
}

impl SubState {
    fn is_free(self) -> bool {
        matches!(self, SubState::NotInUse | SubState::Error)
    }

    fn is_pending(self) -> bool {
        matches!(self, SubState::Subscribing | SubState::Unsubscribing)
    }
}

/// Publish topic lifecycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PubState {
    #[default]
    NotInUse,
    Registering,
    Registered,
    Unregistering,
    Error,
}

impl PubState {
    fn is_free(self) -> bool {
        matches!(self, PubState::NotInUse | PubState::Error)
    }

    fn is_pending(self) -> bool {
        matches!(self, PubState::Registering | PubState::Unregistering)
    }
}

/// Called with each message delivered to a subscribed topic
pub type MessageCallback = fn(&[u8]);

/// Called whenever the module reports a connectivity state
pub type StateCallback = fn(LinkState);

/// Called once with the answer to a host firmware request
pub type FirmwareCallback = fn(bool);

#[derive(Debug, Default, Clone, Copy)]
struct SubTopic {
    state: SubState,
    callback: Option<MessageCallback>,
    since: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct PubTopic {
    state: PubState,
    since: u32,
}

/// MQTT quality of service for [`Client::publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Protocol profile for [`Client::start_protocol`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Mqtt,
    Udp,
}

/// Connectivity state reporting mode for [`Client::update_state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRequest {
    /// Report the current state once
    Once,
    /// Report every state change
    On,
    /// Stop reporting state changes
    Off,
}

/// Size and checksum of the host firmware image held by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareDetails {
    /// Image length in bytes.  0 if no update is available.
    pub length: u32,
    /// XOR of every big-endian 16-bit pair of the image
    pub checksum: u16,
}

/// Format a command and append the line terminator.
fn command_line(args: core::fmt::Arguments) -> Result<heapless::String<CMD_SIZE>> {
    let mut cmd = command_text(args)?;
    cmd.push_str("\r\n").map_err(|_| Error::CommandTooLong)?;
    Ok(cmd)
}

/// Format the start of a command which continues with further data.
fn command_text(args: core::fmt::Arguments) -> Result<heapless::String<CMD_SIZE>> {
    let mut cmd = heapless::String::new();
    cmd.write_fmt(args).map_err(|_| Error::CommandTooLong)?;
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_timeout_floor() {
        let config = ClientConfig::default();
        assert_eq!(config.min_timeout(), MIN_TIMEOUT_MS);

        // 256 bytes at 9600 baud takes 267 ms
        let slow = ClientConfig {
            baud_rate: 9600,
            ..ClientConfig::default()
        };
        assert_eq!(slow.min_timeout(), 267);
    }

    #[test]
    fn test_link_state_from_code() {
        assert_eq!(LinkState::from(0), LinkState::Idle);
        assert_eq!(LinkState::from(6), LinkState::MqttReady);
        assert_eq!(LinkState::from(9), LinkState::Error);
        assert_eq!(LinkState::from(-1), LinkState::Unknown);
        assert_eq!(LinkState::from(42), LinkState::Unknown);
    }

    #[test]
    fn test_notifications() {
        let mut seen = Notifications::NONE;
        seen.insert(Notifications::READY);
        assert!(seen.contains(Notifications::READY));
        assert!(!seen.contains(Notifications::READY | Notifications::MQTT_READY));
        seen.insert(Notifications::MQTT_READY);
        assert!(seen.contains(Notifications::READY | Notifications::MQTT_READY));
        assert_eq!(seen.bits(), 0b011);
    }

    #[test]
    fn test_command_too_long() {
        let long = [b'x'; CMD_SIZE];
        let topic = core::str::from_utf8(&long).unwrap();
        assert_eq!(
            command_line(format_args!("AT+EMQSUBOPEN=0,\"{topic}\"")).err(),
            Some(Error::CommandTooLong)
        );
        assert_eq!(
            command_line(format_args!("AT+EMQSUBCLOSE={}", 3)).unwrap().as_str(),
            "AT+EMQSUBCLOSE=3\r\n"
        );
    }
}
