//! Notification dispatch.
//!
//! Called by the engine whenever a persistent keyword is matched.  Handlers
//! which need the rest of the notification (topic results, message
//! deliveries, state reports) read it with further retrieves; those reads
//! never dispatch, so a handler always runs to completion before the next
//! notification is looked at.  A handler needing a command exchange leaves
//! a request for the engine, which sends it once the handler has returned.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use super::engine::Scan;
use super::parse::{self, text};
use super::{
    ALREADY_IN_STATE, Client, LinkState, Notifications, PubState, RESPONSE_BUF_SIZE, SubState,
};
use crate::codec::decode_hex_in_place;
use crate::io::{Clock, Transport};
use crate::keyword::{Keyword, KeywordSet};
use crate::{Error, Result};

/// Keywords which end a notification line.  Any `\r\n`-terminated keyword
/// outranks the bare terminator on the byte both complete on.
const LINE_END: KeywordSet = KeywordSet::of(Keyword::Crlf)
    .with(Keyword::Ok)
    .with(Keyword::Error)
    .with(Keyword::Idle)
    .with(Keyword::MqttReady)
    .with(Keyword::UdpReady)
    .with(Keyword::SendOk)
    .with(Keyword::SendFail);

impl<T: Transport, C: Clock> Client<T, C> {
    /// Handle one matched notification.
    ///
    /// Only transport failure is returned.  Anything malformed or
    /// incomplete is logged and dropped.
    pub(super) fn dispatch(&mut self, keyword: Keyword) -> Result<()> {
        debug_assert!(!self.dispatching, "notification dispatch re-entered");
        self.dispatching = true;
        let result = self.handle(keyword);
        self.dispatching = false;
        result
    }

    fn handle(&mut self, keyword: Keyword) -> Result<()> {
        trace!("Notification {keyword:?}");
        match keyword {
            Keyword::Idle => self.seen.insert(Notifications::READY),
            Keyword::MqttReady => {
                info!("MQTT ready");
                self.seen.insert(Notifications::MQTT_READY);
            }
            Keyword::UdpReady => {
                info!("UDP ready");
                self.seen.insert(Notifications::UDP_READY);
            }
            Keyword::State => self.on_state()?,
            Keyword::SubOpen | Keyword::SubClose | Keyword::PubOpen | Keyword::PubClose => {
                self.on_topic_result(keyword)?
            }
            Keyword::MqttRecv => self.on_message()?,
            Keyword::AppReady => self.on_app_ready(),
            Keyword::FwAvailable => self.on_firmware_available()?,
            Keyword::SendOk => debug!("Send OK"),
            Keyword::SendFail => warn!("Send failed"),
            Keyword::Crlf => {}
            other => debug!("Unhandled notification {other:?}"),
        }
        Ok(())
    }

    /// Read the remainder of a notification line, terminator included.
    ///
    /// `None` if the line did not complete in time.
    fn read_line(&mut self) -> Result<Option<usize>> {
        let timeout = self.config.command_timeout_ms;
        match self.retrieve(
            RESPONSE_BUF_SIZE,
            Scan::Keywords(LINE_END),
            KeywordSet::PERSISTENT,
            timeout,
        ) {
            Ok(_) => Ok(Some(self.len)),
            Err(Error::NoData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read exactly `count` raw bytes into the buffer from `start`.
    fn read_exact(&mut self, start: usize, count: usize) -> Result<bool> {
        let timeout = self.config.command_timeout_ms;
        match self.retrieve_at(start, count, Scan::Raw, KeywordSet::EMPTY, timeout) {
            Ok(_) => Ok(self.len == start + count),
            Err(Error::NoData) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Consume and throw away `count` bytes.
    fn discard(&mut self, mut count: usize) -> Result<()> {
        while count > 0 {
            let chunk = count.min(RESPONSE_BUF_SIZE);
            if !self.read_exact(0, chunk)? {
                break;
            }
            count -= chunk;
        }
        Ok(())
    }

    fn on_state(&mut self) -> Result<()> {
        let Some(len) = self.read_line()? else {
            warn!("Incomplete state notification");
            return Ok(());
        };
        let Some(code) = parse::int(&self.buf[..len]) else {
            warn!("Bad state notification: {}", text(&self.buf[..len]));
            return Ok(());
        };

        self.state = LinkState::from(code);
        debug!("Link state {code} ({:?})", self.state);
        if let Some(callback) = self.state_cb {
            callback(self.state);
        }
        Ok(())
    }

    /// `<index>,<code>` following a topic open or close.
    fn on_topic_result(&mut self, keyword: Keyword) -> Result<()> {
        let Some(len) = self.read_line()? else {
            warn!("Incomplete {keyword:?} notification");
            return Ok(());
        };
        let Some((index, code)) = parse::pair(&self.buf[..len]) else {
            warn!("Bad {keyword:?} notification: {}", text(&self.buf[..len]));
            return Ok(());
        };
        let ok = code == 0 || code == ALREADY_IN_STATE;
        debug!("{keyword:?} topic {index} code {code}");

        match keyword {
            Keyword::SubOpen | Keyword::SubClose => {
                let state = match (keyword, ok) {
                    (_, false) => SubState::Error,
                    (Keyword::SubOpen, true) => SubState::Subscribed,
                    _ => SubState::NotInUse,
                };
                let Some(topic) = usize::try_from(index).ok().and_then(|i| self.subs.get_mut(i))
                else {
                    warn!("{keyword:?} for unknown topic {index}");
                    return Ok(());
                };
                topic.state = state;
                if state == SubState::NotInUse {
                    topic.callback = None;
                }
            }
            _ => {
                let state = match (keyword, ok) {
                    (_, false) => PubState::Error,
                    (Keyword::PubOpen, true) => PubState::Registered,
                    _ => PubState::NotInUse,
                };
                let Some(topic) = usize::try_from(index).ok().and_then(|i| self.pubs.get_mut(i))
                else {
                    warn!("{keyword:?} for unknown topic {index}");
                    return Ok(());
                };
                topic.state = state;
            }
        }

        if !ok {
            warn!("{keyword:?} failed for topic {index}: {code}");
        }
        Ok(())
    }

    /// `<index>,<length>` then the payload, either raw or as quoted hex.
    fn on_message(&mut self) -> Result<()> {
        let Some(len) = self.read_line()? else {
            warn!("Incomplete message header");
            return Ok(());
        };
        let Some((index, length)) = parse::pair(&self.buf[..len]) else {
            warn!("Bad message header: {}", text(&self.buf[..len]));
            return Ok(());
        };
        let (Ok(index), Ok(length)) = (usize::try_from(index), usize::try_from(length)) else {
            warn!("Bad message header: {index},{length}");
            return Ok(());
        };
        if length == 0 {
            debug!("Empty message for topic {index}");
            return Ok(());
        }

        if !self.read_exact(0, 1)? {
            warn!("Message for topic {index} missing payload");
            return Ok(());
        }

        let payload = if self.buf[0] == b'"' {
            // Hex digits then the closing quote
            let digits = length * 2;
            if digits + 1 > RESPONSE_BUF_SIZE {
                warn!("Message for topic {index} too large ({length} bytes), dropped");
                return self.discard(digits + 1);
            }
            if !self.read_exact(0, digits + 1)? {
                warn!("Message for topic {index} truncated");
                return Ok(());
            }
            if self.buf[digits] != b'"' {
                warn!("Message for topic {index} not terminated");
                return Ok(());
            }
            match decode_hex_in_place(&mut self.buf[..digits]) {
                Ok(n) => n,
                Err(e) => {
                    warn!("Message for topic {index} undecodable: {e:?}");
                    return Ok(());
                }
            }
        } else {
            if length > RESPONSE_BUF_SIZE {
                warn!("Message for topic {index} too large ({length} bytes), dropped");
                return self.discard(length - 1);
            }
            if length > 1 && !self.read_exact(1, length - 1)? {
                warn!("Message for topic {index} truncated");
                return Ok(());
            }
            length
        };

        self.deliver(index, payload);
        Ok(())
    }

    fn deliver(&mut self, index: usize, len: usize) {
        let Some(topic) = self.subs.get(index) else {
            warn!("Message for unknown topic {index}");
            return;
        };
        if topic.state != SubState::Subscribed {
            warn!("Message for topic {index} in state {:?}, dropped", topic.state);
            return;
        }
        debug!("Message for topic {index}, {len} bytes");
        match topic.callback {
            Some(callback) => callback(&self.buf[..len]),
            None => debug!("No callback for topic {index}"),
        }
    }

    /// The modem application has (re)started with echo on.
    fn on_app_ready(&mut self) {
        info!("Modem application ready");
        self.echo_off_pending = true;
    }

    /// Turn command echo off.  Only transport failure is returned.
    pub(super) fn echo_off(&mut self) -> Result<()> {
        match self.command_ok(b"ATE0\r\n", 0) {
            Ok(()) => debug!("Echo off"),
            Err(Error::Io) => return Err(Error::Io),
            Err(e) => warn!("Failed to turn echo off: {e:?}"),
        }
        Ok(())
    }

    fn on_firmware_available(&mut self) -> Result<()> {
        let Some(len) = self.read_line()? else {
            warn!("Incomplete firmware notification");
            return Ok(());
        };
        let available = self.buf[..len].trim_ascii_start().starts_with(b"available");
        info!("Host firmware available: {available}");

        self.fw_available = Some(available);
        if let Some(callback) = self.fw_cb.take() {
            callback(available);
        }
        Ok(())
    }
}
