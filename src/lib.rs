//! AT command protocol engine for a microcontroller driving a serial-attached
//! communications module, with publish/subscribe topic management and an
//! over-the-air firmware update built on top.
//!
//! The module speaks a Hayes-style text protocol.  Commands are sent as
//! `AT+<VERB>=<args>\r\n` and answered with `OK\r\n` or `ERROR\r\n`.
//! Interleaved with those replies the module emits unsolicited notifications
//! (`+<TAG>:<payload>\r\n`, or bare markers such as `APP RDY`) at any time,
//! including in the middle of a reply to a command.
//!
//! `no_std`, no allocation.  All buffers are fixed size.
//!
//! ## Architecture
//!
//! A single [`client::Client`] owns everything needed for one module: the
//! byte transport, a millisecond tick source, the scratch response buffer and
//! the subscribe/publish topic tables.  It is driven from one task:
//!
//! - [`client::Client::poll`] must be called frequently.  It scans incoming
//!   bytes for notifications and dispatches them - topic open/close results,
//!   message deliveries, connectivity state changes and so on.
//! - Application operations ([`client::Client::subscribe`],
//!   [`client::Client::publish`], [`client::Client::start_protocol`], ...)
//!   are synchronous.  They send a command and wait, with a timeout, for the
//!   module's reply.  Notifications that arrive while waiting are dispatched
//!   exactly as they would be from `poll`.
//!
//! Incoming bytes are matched against a fixed keyword table by a streaming
//! multi-pattern matcher (see [`keyword`]).  Every keyword is tracked in
//! parallel, so keywords sharing a prefix (`+EMQ:` and `+EMQSUBOPEN:`) are
//! told apart correctly.
//!
//! Firmware updates are handled by [`update::Updater`], which pulls the image
//! from the module in chunks, collates it into 64-bit double-words, programs
//! and verifies the inactive flash bank, checks the image's 16-bit XOR
//! checksum and only then swaps the boot bank.  Any failure leaves the
//! current boot bank untouched.
//!
//! ## Modules
//!
//! - [`io`] - traits the application implements: [`io::Transport`] (serial
//!   port), [`io::Clock`] (tick source and scheduler yield) and
//!   [`io::Storage`] (dual-bank flash)
//! - [`channel`] - bounded receive FIFO with overflow accounting, for the
//!   interrupt side of a [`io::Transport`] implementation
//! - [`keyword`] - keyword table, keyword sets and the streaming matcher
//! - [`client`] - the protocol engine, notification dispatch, topics and
//!   host-firmware commands
//! - [`codec`] - ascii-hex payload encoding
//! - [`update`] - firmware transfer and bank swap
//!
//! ## Getting Started
//!
//! ```rust,ignore
//! use etm_link::client::{Client, ClientConfig, Protocol};
//!
//! let mut client = Client::new(uart, ticks, ClientConfig::default());
//! client.init()?;
//! client.start_protocol(Protocol::Mqtt)?;
//! let idx = client.subscribe("update", Some(on_update))?;
//! loop {
//!     client.poll()?;
//! }
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(test)]
extern crate std;

pub mod channel;
pub mod client;
pub mod codec;
pub mod io;
pub mod keyword;
pub mod update;

#[cfg(test)]
mod testing;

/// Protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No recognisable data before the deadline
    NoData,
    /// Waited too long for an asynchronous event
    Timeout,
    /// Transport failed to send
    Send,
    /// Transport receive or control failure - the link needs restarting
    Io,
    /// Invalid operation or argument
    InvalidOperation,
    /// Command does not fit the command buffer
    CommandTooLong,
    /// Module answered with an error terminator
    Rejected,
    /// Reply could not be parsed
    Parse,
    /// Malformed ascii-hex data
    Decode,
    /// All topic slots are in use
    NoFreeSlot,
    /// Topic index out of range
    InvalidTopic,
    /// Topic is not in the state the operation requires
    InvalidState,
    /// Fewer firmware octets returned than requested
    ShortRead,
    /// Flash erase or program failure
    Flash,
    /// Flash read-back did not match what was programmed
    Verify {
        /// Address of the failing double-word
        address: u32,
    },
    /// Image checksum did not match the one supplied by the module
    ChecksumMismatch {
        /// Checksum reported by the module
        expected: u16,
        /// Checksum calculated over the received image
        calculated: u16,
    },
    /// Boot bank selection could not be changed
    BankSwap,
    /// Image is larger than a flash bank
    ImageTooLarge {
        /// Image length reported by the module
        length: u32,
    },
}

/// Type to represent the result of a protocol operation
pub type Result<T> = core::result::Result<T, Error>;
