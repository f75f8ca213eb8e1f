//! Over-the-air host firmware update.
//!
//! [`Updater`] pulls an image from the module in chunks and writes it to the
//! flash bank the device is not running from:
//!
//! 1. Erase the inactive bank.
//! 2. Read the image a chunk at a time, collating it into double-words,
//!    each programmed and read back as soon as it is complete.
//! 3. Pad and program any final partial double-word.
//! 4. Compare the image checksum with the one the module reported.
//! 5. Acknowledge the image to the module, then swap boot banks.
//!
//! Any failure stops the update at once and returns an error, leaving the
//! boot bank alone.  The updater holds the client for the whole transfer,
//! so only one can ever be in progress.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod bank;
pub mod collate;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

pub use collate::Collator;

use crate::client::{Client, FirmwareDetails, MAX_READ_CHUNK, time_left};
use crate::io::{Bank, Clock, Storage, Transport};
use crate::{Error, Result};

/// Where the inactive bank is mapped on STM32L4 dual-bank parts
pub const DEFAULT_BASE_ADDRESS: u32 = 0x0808_0000;

/// Size of one flash bank on 1MB STM32L4 dual-bank parts
pub const DEFAULT_BANK_SIZE: u32 = 0x8_0000;

/// Bytes requested from the module per read
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Progress is logged each time this many more percent is written
const PROGRESS_STEP: u32 = 5;

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Address the image is written from
    pub base_address: u32,
    /// Largest image the bank at `base_address` holds
    pub bank_size: u32,
    /// Bytes per read.  Must be even, and at most [`MAX_READ_CHUNK`].
    pub chunk_size: usize,
    /// Further attempts at a chunk read which fails
    pub read_retries: u8,
    /// How long [`Trigger::Url`] waits to hear whether an image exists
    pub availability_timeout_ms: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE_ADDRESS,
            bank_size: DEFAULT_BANK_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_retries: 2,
            availability_timeout_ms: 60_000,
        }
    }
}

/// How an update is started
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    /// Use whatever image the module already holds
    Poll,
    /// Have the module fetch an image from this URL first
    Url(&'a str),
}

/// Result of a completed update run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The module holds no image
    NoUpdate,
    /// The module found no image at the URL
    Unavailable,
    /// Image stored and boot bank swapped
    Updated(TransferReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Image length in bytes
    pub length: u32,
    /// Verified image checksum
    pub checksum: u16,
    /// Bank the image was written to, and now boots
    pub bank: Bank,
}

/// Firmware update driver, borrowing the device's flash.
pub struct Updater<'s, S: Storage> {
    storage: &'s mut S,
    config: UpdateConfig,
}

impl<'s, S: Storage> Updater<'s, S> {
    pub fn new(storage: &'s mut S, config: UpdateConfig) -> Result<Self> {
        if config.chunk_size == 0 || config.chunk_size % 2 != 0 || config.chunk_size > MAX_READ_CHUNK
        {
            error!("Invalid update chunk size {}", config.chunk_size);
            return Err(Error::InvalidOperation);
        }
        if config.base_address % 8 != 0 {
            error!("Unaligned update address {:#010X}", config.base_address);
            return Err(Error::InvalidOperation);
        }
        let end = config
            .bank_size
            .checked_next_multiple_of(8)
            .and_then(|size| config.base_address.checked_add(size));
        if end.is_none() {
            error!(
                "Bank of {} bytes at {:#010X} overflows the address space",
                config.bank_size, config.base_address
            );
            return Err(Error::InvalidOperation);
        }
        Ok(Self { storage, config })
    }

    /// Check for an image and, if there is one, install it.
    ///
    /// With [`Trigger::Url`], any availability callback already armed on
    /// the client stays armed for the new request.
    pub fn run<T: Transport, C: Clock>(
        &mut self,
        client: &mut Client<T, C>,
        trigger: Trigger<'_>,
    ) -> Result<Outcome> {
        if let Trigger::Url(url) = trigger {
            let callback = client.firmware_callback();
            client.get_host_firmware(Some(url), callback)?;
            if !self.await_availability(client)? {
                info!("No firmware available from {url}");
                return Ok(Outcome::Unavailable);
            }
        }

        let details = client.firmware_details()?;
        self.transfer(client, details)
    }

    fn await_availability<T: Transport, C: Clock>(
        &mut self,
        client: &mut Client<T, C>,
    ) -> Result<bool> {
        let timeout = self.config.availability_timeout_ms;
        let start = client.ticks();
        loop {
            if let Some(available) = client.firmware_available() {
                return Ok(available);
            }
            if time_left(start, client.ticks(), timeout) <= 0 {
                warn!("No firmware availability after {timeout}ms");
                return Err(Error::Timeout);
            }
            client.poll()?;
        }
    }

    /// Install the image described by `details`.
    pub fn transfer<T: Transport, C: Clock>(
        &mut self,
        client: &mut Client<T, C>,
        details: FirmwareDetails,
    ) -> Result<Outcome> {
        let FirmwareDetails { length, checksum } = details;
        if length == 0 {
            info!("No firmware update available");
            return Ok(Outcome::NoUpdate);
        }
        if length > self.config.bank_size {
            error!(
                "Firmware image of {length} bytes exceeds bank size {}",
                self.config.bank_size
            );
            return Err(Error::ImageTooLarge { length });
        }

        let target = self.storage.boot_bank().other();
        info!("Firmware update: {length} bytes, checksum {checksum:#06x}, to bank {target:?}");
        self.storage.erase_bank(target).map_err(|e| {
            error!("Failed to erase bank {target:?}: {e:?}");
            Error::Flash
        })?;

        let mut collator = Collator::new();
        let mut address = self.config.base_address;
        let mut buf = [0u8; MAX_READ_CHUNK];
        let mut offset = 0u32;
        let mut reported = 0u32;

        while offset < length {
            let size = (length - offset).min(self.config.chunk_size as u32) as usize;
            let chunk = &mut buf[..size];
            self.read_chunk(client, offset, chunk)?;

            for &byte in chunk.iter() {
                if let Some(dword) = collator.push(byte) {
                    self.program(address, dword)?;
                    address += 8;
                }
            }
            offset += size as u32;

            let percent = (u64::from(offset) * 100 / u64::from(length)) as u32;
            if percent >= reported + PROGRESS_STEP {
                reported = percent - percent % PROGRESS_STEP;
                info!("Firmware update {reported}%");
            }
        }

        if let Some(dword) = collator.finish() {
            self.program(address, dword)?;
        }

        let calculated = collator.checksum();
        if calculated != checksum {
            error!("Firmware checksum {calculated:#06x}, expected {checksum:#06x}");
            return Err(Error::ChecksumMismatch {
                expected: checksum,
                calculated,
            });
        }
        info!("Firmware image verified");

        if let Err(e) = client.ack_firmware() {
            warn!("Firmware not acknowledged: {e:?}");
        }
        let bank = bank::swap_boot_bank(&mut *self.storage)?;

        Ok(Outcome::Updated(TransferReport {
            length,
            checksum,
            bank,
        }))
    }

    fn read_chunk<T: Transport, C: Clock>(
        &mut self,
        client: &mut Client<T, C>,
        offset: u32,
        out: &mut [u8],
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match client.read_firmware(offset, out) {
                Ok(()) => return Ok(()),
                Err(Error::Io) => return Err(Error::Io),
                Err(e) if attempt < self.config.read_retries => {
                    attempt += 1;
                    warn!("Firmware read at {offset} failed: {e:?}, retry {attempt}");
                }
                Err(e) => {
                    error!("Firmware read at {offset} failed: {e:?}");
                    return Err(e);
                }
            }
        }
    }

    /// Program one double-word and check it reads back.
    fn program(&mut self, address: u32, value: u64) -> Result<()> {
        self.storage.program_doubleword(address, value).map_err(|e| {
            error!("Flash program failed at {address:#010X}: {e:?}");
            Error::Flash
        })?;

        let read = self.storage.read_doubleword(address);
        if read != value {
            error!("Flash verify failed at {address:#010X}: wrote {value:#018X}, read {read:#018X}");
            return Err(Error::Verify { address });
        }
        Ok(())
    }
}
