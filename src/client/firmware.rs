//! Host firmware commands.
//!
//! The module fetches host firmware images on the host's behalf and serves
//! them back in chunks as ascii-hex.  These methods only talk to the
//! module; storing the image is [`crate::update`]'s job.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use super::parse::{self, after_tag, first_line, text};
use super::{
    Client, FirmwareCallback, FirmwareDetails, RESPONSE_BUF_SIZE, TOUT_FIRMWARE_READ,
    command_line,
};
use crate::codec::{decode_hex, hex_run};
use crate::io::{Clock, Transport};
use crate::{Error, Result};

const READ_TAG: &[u8] = b"+ETMHFWREAD:";

/// Reply overhead around a chunk's hex digits: the tag, terminators and
/// `OK`, with room for an echo.
const READ_OVERHEAD: usize = 64;

/// Largest chunk [`Client::read_firmware`] can return.
pub const MAX_READ_CHUNK: usize = (RESPONSE_BUF_SIZE - READ_OVERHEAD) / 2;

impl<T: Transport, C: Clock> Client<T, C> {
    /// Ask the module to check for host firmware, optionally from a new
    /// update URL.
    ///
    /// The answer arrives later by notification: `callback` is called once
    /// with it, and [`Client::firmware_available`] returns it.
    pub fn get_host_firmware(
        &mut self,
        url: Option<&str>,
        callback: Option<FirmwareCallback>,
    ) -> Result<()> {
        if let Some(url) = url {
            info!("Firmware update URL {url}");
            let cmd = command_line(format_args!("AT+ETMCFG=host,updateurl,{url}"))?;
            self.command_ok(cmd.as_bytes(), 0)?;
        }

        // Armed before sending, in case the answer beats the OK
        self.fw_available = None;
        self.fw_cb = callback;
        if let Err(e) = self.command_ok(b"AT+ETMHFWGET\r\n", 0) {
            warn!("Firmware request failed: {e:?}");
            self.fw_cb = None;
            return Err(e);
        }
        Ok(())
    }

    /// Answer to the last [`Client::get_host_firmware`], once known.
    pub fn firmware_available(&self) -> Option<bool> {
        self.fw_available
    }

    /// Availability callback armed and not yet called.
    pub fn firmware_callback(&self) -> Option<FirmwareCallback> {
        self.fw_cb
    }

    /// Length and checksum of the image the module holds.
    pub fn firmware_details(&mut self) -> Result<FirmwareDetails> {
        let len = self.query(b"AT+ETMHFWREAD?\r\n", 0)?;
        let Some(body) = after_tag(&self.buf[..len], READ_TAG) else {
            warn!("No firmware details in reply");
            return Err(Error::Parse);
        };
        let line = first_line(body);

        let mut fields = line.splitn(2, |b| *b == b',');
        let length = fields
            .next()
            .and_then(parse::int)
            .and_then(|n| u32::try_from(n).ok());
        let checksum = fields
            .next()
            .and_then(|f| core::str::from_utf8(f.trim_ascii()).ok())
            .and_then(|s| u16::from_str_radix(s, 16).ok());

        match (length, checksum) {
            (Some(length), Some(checksum)) => {
                debug!("Firmware length {length} checksum {checksum:#06x}");
                Ok(FirmwareDetails { length, checksum })
            }
            _ => {
                warn!("Bad firmware details: {}", text(line));
                Err(Error::Parse)
            }
        }
    }

    /// Read `out.len()` bytes of the image from `offset`.
    ///
    /// Fewer bytes than requested is [`Error::ShortRead`].
    pub fn read_firmware(&mut self, offset: u32, out: &mut [u8]) -> Result<()> {
        if out.is_empty() || out.len() > MAX_READ_CHUNK {
            warn!("Invalid firmware read size {}", out.len());
            return Err(Error::InvalidOperation);
        }
        let cmd = command_line(format_args!("AT+ETMHFWREAD={offset},{}", out.len()))?;
        let len = self.query(cmd.as_bytes(), TOUT_FIRMWARE_READ)?;

        let Some(body) = after_tag(&self.buf[..len], READ_TAG) else {
            warn!("No firmware data in reply at {offset}");
            return Err(Error::Parse);
        };
        let body = body.trim_ascii_start();
        let digits = hex_run(body).min(out.len() * 2);
        let count = decode_hex(&body[..digits], out)?;

        if count != out.len() {
            warn!("Short firmware read at {offset}: {count} of {}", out.len());
            return Err(Error::ShortRead);
        }
        trace!("Read {count} bytes at {offset}");
        Ok(())
    }

    /// Tell the module the image has been stored.
    pub fn ack_firmware(&mut self) -> Result<()> {
        debug!("Acknowledging firmware");
        self.command_ok(b"AT+ETMHFWACK\r\n", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{firmware_reply, ready_client};

    #[test]
    fn test_firmware_details() {
        let mut client = ready_client();
        client.transport_mut().expect(
            b"AT+ETMHFWREAD?\r\n",
            b"\r\n+ETMHFWREAD:103424,8f1e\r\n\r\nOK\r\n",
        );
        assert_eq!(
            client.firmware_details(),
            Ok(FirmwareDetails {
                length: 103_424,
                checksum: 0x8f1e
            })
        );

        client
            .transport_mut()
            .expect(b"AT+ETMHFWREAD?\r\n", b"+ETMHFWREAD:0,0\r\nOK\r\n");
        assert_eq!(
            client.firmware_details(),
            Ok(FirmwareDetails {
                length: 0,
                checksum: 0
            })
        );
    }

    #[test]
    fn test_firmware_details_malformed() {
        let mut client = ready_client();
        client
            .transport_mut()
            .expect(b"AT+ETMHFWREAD?\r\n", b"+ETMHFWREAD:12\r\nOK\r\n");
        assert_eq!(client.firmware_details(), Err(Error::Parse));

        client
            .transport_mut()
            .expect(b"AT+ETMHFWREAD?\r\n", b"ERROR\r\n");
        assert_eq!(client.firmware_details(), Err(Error::Rejected));
    }

    #[test]
    fn test_read_firmware_chunk() {
        let mut client = ready_client();
        client
            .transport_mut()
            .expect(b"AT+ETMHFWREAD=100,4\r\n", &firmware_reply(&[0xde, 0xad, 0xbe, 0xef]));
        let mut out = [0u8; 4];
        assert_eq!(client.read_firmware(100, &mut out), Ok(()));
        assert_eq!(out, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_read_firmware_short() {
        let mut client = ready_client();
        client
            .transport_mut()
            .expect(b"AT+ETMHFWREAD=0,4\r\n", &firmware_reply(&[1, 2, 3]));
        let mut out = [0u8; 4];
        assert_eq!(client.read_firmware(0, &mut out), Err(Error::ShortRead));

        let mut empty = [0u8; 0];
        assert_eq!(
            client.read_firmware(0, &mut empty),
            Err(Error::InvalidOperation)
        );
        let mut huge = [0u8; MAX_READ_CHUNK + 1];
        assert_eq!(
            client.read_firmware(0, &mut huge),
            Err(Error::InvalidOperation)
        );
    }

    #[test]
    fn test_get_host_firmware_with_url() {
        let mut client = ready_client();
        client.transport_mut().expect(
            b"AT+ETMCFG=host,updateurl,https://example.com/fw.bin\r\n",
            b"OK\r\n",
        );
        client
            .transport_mut()
            .expect(b"AT+ETMHFWGET\r\n", b"+ETMHFWGET:available\r\nOK\r\n");
        assert_eq!(
            client.get_host_firmware(Some("https://example.com/fw.bin"), None),
            Ok(())
        );
        assert_eq!(client.firmware_available(), Some(true));
    }

    #[test]
    fn test_url_rejected_skips_request() {
        let mut client = ready_client();
        client
            .transport_mut()
            .expect(b"AT+ETMCFG=host,updateurl,bad\r\n", b"ERROR\r\n");
        assert_eq!(
            client.get_host_firmware(Some("bad"), None),
            Err(Error::Rejected)
        );
        assert!(!crate::testing::sent(&client).contains("AT+ETMHFWGET"));
    }
}
