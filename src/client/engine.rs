//! Command/response engine.
//!
//! Every exchange with the module goes through [`Client::retrieve`], which
//! pulls bytes from the transport into the scratch buffer while feeding a
//! [`Matcher`].  A caller says which keywords end its wait; any persistent
//! notification matched along the way is dispatched on the spot and the
//! bytes collected so far are discarded, so a notification landing in the
//! middle of a command's reply is still handled.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use super::parse::text;
use super::{
    ClientConfig, FirmwareCallback, LinkState, MAX_PUB_TOPICS, MAX_SUB_TOPICS, Notifications,
    Protocol, PubTopic, RESPONSE_BUF_SIZE, StateCallback, StateRequest, SubTopic,
};
use crate::io::{Clock, Transport};
use crate::keyword::{Keyword, KeywordSet, Matcher};
use crate::{Error, Result};

/// How [`Client::retrieve`] treats incoming bytes
#[derive(Debug, Clone, Copy)]
pub(super) enum Scan {
    /// Collect bytes without looking for keywords
    Raw,
    /// Scan for keywords, returning on any in the set
    Keywords(KeywordSet),
}

/// What ended a [`Client::retrieve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Retrieved {
    Matched(Keyword),
    Bytes(usize),
}

/// Milliseconds remaining of `timeout` started at `start`.
///
/// Zero or negative once the deadline has passed.  Correct across wrap of
/// the tick counter.
pub fn time_left(start: u32, now: u32, timeout: u32) -> i64 {
    i64::from(timeout) - i64::from(now.wrapping_sub(start))
}

/// Protocol context for one module.
pub struct Client<T: Transport, C: Clock> {
    pub(super) transport: T,
    pub(super) clock: C,
    pub(super) config: ClientConfig,
    pub(super) buf: [u8; RESPONSE_BUF_SIZE],
    /// Bytes held in `buf` by the last retrieve
    pub(super) len: usize,
    pub(super) subs: [SubTopic; MAX_SUB_TOPICS],
    pub(super) pubs: [PubTopic; MAX_PUB_TOPICS],
    pub(super) seen: Notifications,
    pub(super) state: LinkState,
    pub(super) state_cb: Option<StateCallback>,
    pub(super) fw_cb: Option<FirmwareCallback>,
    pub(super) fw_available: Option<bool>,
    pub(super) dispatching: bool,
    /// Echo off requested by a handler, sent once dispatch returns
    pub(super) echo_off_pending: bool,
}

impl<T: Transport, C: Clock> Client<T, C> {
    /// Create a client.  Nothing is sent until [`Client::init`].
    pub fn new(transport: T, clock: C, config: ClientConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            buf: [0; RESPONSE_BUF_SIZE],
            len: 0,
            subs: [SubTopic::default(); MAX_SUB_TOPICS],
            pubs: [PubTopic::default(); MAX_PUB_TOPICS],
            seen: Notifications::NONE,
            state: LinkState::Unknown,
            state_cb: None,
            fw_cb: None,
            fw_available: None,
            dispatching: false,
            echo_off_pending: false,
        }
    }

    /// Start the transport and wait for the module to report ready.
    ///
    /// Clears all topic state.  Returns [`Error::Timeout`] if the ready
    /// marker is not seen within `ready_timeout_ms`.
    pub fn init(&mut self) -> Result<()> {
        info!("Initialising module link");
        self.transport.flush();
        self.transport.init().map_err(|e| {
            error!("Transport init failed: {e:?}");
            Error::Io
        })?;
        self.reset();

        let timeout = self.config.ready_timeout_ms;
        self.wait_for(Notifications::READY, timeout).inspect_err(|_| {
            warn!("Module not ready after {timeout}ms");
        })?;
        info!("Module ready");
        Ok(())
    }

    /// Stop the transport.
    pub fn deinit(&mut self) -> Result<()> {
        info!("Stopping module link");
        self.transport.deinit().map_err(|e| {
            error!("Transport deinit failed: {e:?}");
            Error::Io
        })
    }

    /// Change the link baud rate.  The minimum reply timeout follows it.
    pub fn set_baud(&mut self, rate: u32) -> Result<()> {
        self.transport.set_baud(rate).map_err(|e| {
            error!("Failed to set baud rate {rate}: {e:?}");
            Error::Io
        })?;
        self.config.baud_rate = rate;
        debug!("Baud rate {rate}, minimum timeout {}ms", self.config.min_timeout());
        Ok(())
    }

    fn reset(&mut self) {
        self.subs = [SubTopic::default(); MAX_SUB_TOPICS];
        self.pubs = [PubTopic::default(); MAX_PUB_TOPICS];
        self.seen = Notifications::NONE;
        self.state = LinkState::Unknown;
        self.fw_cb = None;
        self.fw_available = None;
        self.echo_off_pending = false;
        self.len = 0;
    }

    /// Process notifications.  Call frequently.
    ///
    /// Waits up to `command_timeout_ms` for incoming data, dispatching every
    /// notification seen.  Silence is not an error; transport failure is.
    pub fn poll(&mut self) -> Result<()> {
        self.check_timeouts();
        let timeout = self.config.command_timeout_ms;
        match self.retrieve(
            RESPONSE_BUF_SIZE,
            Scan::Keywords(KeywordSet::EMPTY),
            KeywordSet::PERSISTENT,
            timeout,
        ) {
            Ok(_) | Err(Error::NoData) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Poll until every notification in `flags` has been seen.
    pub fn wait_for(&mut self, flags: Notifications, timeout: u32) -> Result<()> {
        let start = self.clock.ticks();
        while !self.seen.contains(flags) {
            if time_left(start, self.clock.ticks(), timeout) <= 0 {
                return Err(Error::Timeout);
            }
            self.poll()?;
        }
        Ok(())
    }

    /// Ask the module to report its connectivity state once, or turn change
    /// reporting on or off.
    pub fn update_state(&mut self, request: StateRequest) -> Result<()> {
        let cmd: &[u8] = match request {
            StateRequest::Once => b"AT+ETMSTATE?\r\n",
            StateRequest::On => b"AT+ETMSTATE=1\r\n",
            StateRequest::Off => b"AT+ETMSTATE=0\r\n",
        };
        debug!("State request {request:?}");
        self.command_ok(cmd, 0)
    }

    /// Set the function called with each reported connectivity state.
    pub fn set_state_callback(&mut self, callback: Option<StateCallback>) {
        self.state_cb = callback;
    }

    /// Start the module's MQTT or UDP profile.  Readiness is reported later
    /// by notification; see [`Client::wait_for`].
    pub fn start_protocol(&mut self, protocol: Protocol) -> Result<()> {
        let cmd: &[u8] = match protocol {
            Protocol::Mqtt => b"AT+ETMSTATE=startmqtt\r\n",
            Protocol::Udp => b"AT+ETMSTATE=startudp\r\n",
        };
        info!("Starting {protocol:?}");
        self.command_ok(cmd, 0)
    }

    /// Send a raw AT command, without the terminator, and return the reply
    /// body on `OK`.
    ///
    /// `ERROR` and `+CME ERROR:` replies are [`Error::Rejected`].
    pub fn command(&mut self, cmd: &str, timeout: u32) -> Result<&[u8]> {
        let line = super::command_line(format_args!("{cmd}"))?;
        let expect = KeywordSet::REPLY | Keyword::CmeError;
        match self.exchange(
            line.as_bytes(),
            expect,
            KeywordSet::PERSISTENT.without(Keyword::Crlf),
            timeout,
        )? {
            Keyword::Ok => Ok(self.response()),
            other => {
                warn!("{cmd} failed: {other:?}");
                Err(Error::Rejected)
            }
        }
    }

    /// Write bytes to the module without waiting for a reply.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        trace!("Tx: {}", text(data));
        match self.transport.send(data) {
            Ok(n) if n == data.len() => Ok(()),
            Ok(n) => {
                warn!("Short send: {n} of {} bytes", data.len());
                Err(Error::Send)
            }
            Err(e) => {
                warn!("Send failed: {e:?}");
                Err(Error::Send)
            }
        }
    }

    /// Notifications seen since [`Client::init`].
    pub fn notifications(&self) -> Notifications {
        self.seen
    }

    /// Last connectivity state reported by the module.
    pub fn link_state(&self) -> LinkState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Current tick count from the client's clock.
    pub fn ticks(&mut self) -> u32 {
        self.clock.ticks()
    }

    /// Bytes collected by the last exchange.
    pub(super) fn response(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Send `cmd` and wait for a keyword in `expect`.
    ///
    /// A timeout of 0 uses `command_timeout_ms`.
    pub(super) fn execute(
        &mut self,
        cmd: &[u8],
        expect: KeywordSet,
        timeout: u32,
    ) -> Result<Keyword> {
        self.exchange(cmd, expect, KeywordSet::PERSISTENT, timeout)
    }

    /// Send `cmd` and expect `OK`.  `ERROR` is [`Error::Rejected`].
    pub(super) fn command_ok(&mut self, cmd: &[u8], timeout: u32) -> Result<()> {
        match self.execute(cmd, KeywordSet::REPLY, timeout)? {
            Keyword::Ok => Ok(()),
            _ => {
                debug!("Command rejected: {}", text(cmd));
                Err(Error::Rejected)
            }
        }
    }

    /// Send `cmd` and expect `OK`, keeping the whole reply body in the
    /// buffer.  Returns the number of bytes held.
    pub(super) fn query(&mut self, cmd: &[u8], timeout: u32) -> Result<usize> {
        match self.exchange(
            cmd,
            KeywordSet::REPLY,
            KeywordSet::PERSISTENT.without(Keyword::Crlf),
            timeout,
        )? {
            Keyword::Ok => Ok(self.len),
            _ => {
                debug!("Query rejected: {}", text(cmd));
                Err(Error::Rejected)
            }
        }
    }

    fn exchange(
        &mut self,
        cmd: &[u8],
        expect: KeywordSet,
        persistent: KeywordSet,
        timeout: u32,
    ) -> Result<Keyword> {
        let timeout = if timeout == 0 {
            self.config.command_timeout_ms
        } else {
            timeout
        };
        self.send_raw(cmd)?;
        match self.retrieve(RESPONSE_BUF_SIZE, Scan::Keywords(expect), persistent, timeout) {
            Ok(Retrieved::Matched(kw)) => Ok(kw),
            Ok(Retrieved::Bytes(_)) => Err(Error::NoData),
            Err(e) => {
                debug!("No reply to {}: {e:?}", text(cmd));
                Err(e)
            }
        }
    }

    /// Collect bytes into the start of the buffer.  See [`Client::retrieve_at`].
    pub(super) fn retrieve(
        &mut self,
        limit: usize,
        scan: Scan,
        persistent: KeywordSet,
        timeout: u32,
    ) -> Result<Retrieved> {
        self.retrieve_at(0, limit, scan, persistent, timeout)
    }

    /// Collect up to `limit` bytes into the buffer from `start`, until the
    /// scan is satisfied or `timeout` expires.
    ///
    /// With [`Scan::Raw`] returns once `limit` bytes are held, or at the
    /// deadline if any are.  With [`Scan::Keywords`] returns the first
    /// keyword in the set; bytes beyond `limit` are still scanned.  Persistent
    /// keywords not in the set are dispatched, unless already dispatching,
    /// and the bytes collected before them discarded.  Commands a handler
    /// asks for are sent after it returns, with dispatch enabled again.
    pub(super) fn retrieve_at(
        &mut self,
        start: usize,
        limit: usize,
        scan: Scan,
        persistent: KeywordSet,
        timeout: u32,
    ) -> Result<Retrieved> {
        let start = start.min(RESPONSE_BUF_SIZE);
        let limit = limit.min(RESPONSE_BUF_SIZE - start);
        if limit == 0 && matches!(scan, Scan::Raw) {
            return Err(Error::InvalidOperation);
        }

        let timeout = timeout.max(self.config.min_timeout());
        let mut matcher = Matcher::new();
        let mut count = 0;
        self.buf[start..start + limit].fill(0);
        self.len = start;

        let begin = self.clock.ticks();
        while time_left(begin, self.clock.ticks(), timeout) > 0 {
            let byte = match self.transport.receive_one() {
                Ok(Some(byte)) => byte,
                Ok(None) => {
                    self.clock.pause();
                    continue;
                }
                Err(e) => {
                    error!("Receive failed: {e:?}");
                    return Err(Error::Io);
                }
            };

            if count < limit {
                self.buf[start + count] = byte;
                count += 1;
                self.len = start + count;
            }

            match scan {
                Scan::Raw => {
                    if count == limit {
                        return Ok(Retrieved::Bytes(count));
                    }
                }
                Scan::Keywords(wanted) => {
                    let Some(keyword) = matcher.feed(byte) else {
                        continue;
                    };
                    if wanted.contains(keyword) {
                        trace!("Rx: {}", text(&self.buf[start..start + count]));
                        return Ok(Retrieved::Matched(keyword));
                    }
                    if persistent.contains(keyword) && !self.dispatching {
                        self.dispatch(keyword)?;
                        if self.echo_off_pending {
                            self.echo_off_pending = false;
                            self.echo_off()?;
                        }
                        count = 0;
                        self.buf[start..start + limit].fill(0);
                        self.len = start;
                    }
                }
            }
        }

        if matches!(scan, Scan::Raw) && count > 0 {
            debug!("Timed out with {count} of {limit} bytes");
            return Ok(Retrieved::Bytes(count));
        }
        Err(Error::NoData)
    }
}
