//! Traits for the hardware this crate drives but does not own.
//!
//! - [`Transport`] - the serial link to the module.  The engine only ever
//!   polls [`Transport::receive_one()`]; it never assumes a receive callback.
//!   Typically implemented over a UART whose receive interrupt feeds a
//!   [`crate::channel::RxChannel`].
//! - [`Clock`] - a free-running millisecond tick counter and a way to yield
//!   to the scheduler while waiting for data.
//! - [`Storage`] - dual-bank internal flash, used by [`crate::update`].
//!
//! # Address Space
//!
//! [`Storage`] methods use absolute addresses as they appear in the target's
//! memory map.  On STM32L4 dual-bank parts the inactive bank is always mapped
//! at `0x08080000`, whichever physical bank that is.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Byte transport to the module.
pub trait Transport {
    /// The error type returned by transport operations.
    type Error: core::fmt::Debug;

    /// Configure and start the transport.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Stop the transport and release the hardware.
    fn deinit(&mut self) -> Result<(), Self::Error>;

    /// Change the link baud rate.
    fn set_baud(&mut self, rate: u32) -> Result<(), Self::Error>;

    /// Send bytes, returning how many were written.
    fn send(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Take one received byte, if any is waiting.
    ///
    /// `Ok(None)` means nothing is available yet.  An error means the
    /// transport itself has failed and the link must be restarted.
    fn receive_one(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Discard any received, unread data.
    fn flush(&mut self);
}

/// Millisecond tick source.
pub trait Clock {
    /// Current tick count in milliseconds.  Free running, may wrap.
    fn ticks(&mut self) -> u32;

    /// Yield while waiting for receive data.
    ///
    /// Called whenever the receive path is empty.  An RTOS implementation
    /// typically delays for one tick.
    fn pause(&mut self) {}
}

/// Flash bank of a dual-bank device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    One,
    Two,
}

impl Bank {
    /// The opposite bank.
    pub fn other(self) -> Self {
        match self {
            Bank::One => Bank::Two,
            Bank::Two => Bank::One,
        }
    }
}

/// Dual-bank flash driver.
pub trait Storage {
    /// The error type returned by flash operations.
    type Error: core::fmt::Debug;

    /// Erase every page of `bank`.
    fn erase_bank(&mut self, bank: Bank) -> Result<(), Self::Error>;

    /// Program one 64-bit double-word at `address`, which must be 8-byte
    /// aligned and erased.
    fn program_doubleword(&mut self, address: u32, value: u64) -> Result<(), Self::Error>;

    /// Read back the double-word at `address`.
    fn read_doubleword(&mut self, address: u32) -> u64;

    /// The bank the device currently boots from.
    fn boot_bank(&mut self) -> Bank;

    /// Select the bank to boot from and commit the option bytes.
    ///
    /// On real hardware committing the option bytes resets the device, so
    /// this may not return.
    fn set_boot_bank(&mut self, bank: Bank) -> Result<(), Self::Error>;
}
