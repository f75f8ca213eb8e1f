//! Subscribe and publish topic slots.
//!
//! A topic's slot index is its handle, both here and on the wire.  New
//! topics always take the lowest free slot; slots in the error state are
//! free.  Opening and closing is two-step: the command's `OK` moves the slot
//! to a pending state, and the module's later open/close notification
//! completes the transition.  Pending slots that never hear back are moved
//! to the error state once `pending_timeout_ms` has passed.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use super::engine::time_left;
use super::{
    Client, MessageCallback, PubState, PubTopic, QoS, SubState, SubTopic, command_line,
    command_text,
};
use crate::codec::encode_hex;
use crate::io::{Clock, Transport};
use crate::{Error, Result};

impl<T: Transport, C: Clock> Client<T, C> {
    /// Subscribe to `topic`, returning its slot index.
    ///
    /// `callback` receives every message delivered once the module confirms
    /// the subscription.
    pub fn subscribe(&mut self, topic: &str, callback: Option<MessageCallback>) -> Result<usize> {
        self.check_timeouts();
        let Some(index) = self.subs.iter().position(|t| t.state.is_free()) else {
            warn!("No free subscribe slot for {topic}");
            return Err(Error::NoFreeSlot);
        };
        let cmd = command_line(format_args!("AT+EMQSUBOPEN={index},\"{topic}\""))?;

        // Pending before sending, so an open notification arriving ahead of
        // the OK is not overwritten
        let since = self.clock.ticks();
        self.subs[index] = SubTopic {
            state: SubState::Subscribing,
            callback,
            since,
        };

        info!("Subscribing to {topic} (topic {index})");
        if let Err(e) = self.command_ok(cmd.as_bytes(), 0) {
            if self.subs[index].state == SubState::Subscribing {
                warn!("Subscribe to {topic} failed: {e:?}");
                self.subs[index] = SubTopic::default();
                return Err(e);
            }
            // The module answered by notification regardless
            debug!("Subscribe to {topic}: {e:?}, now {:?}", self.subs[index].state);
        }
        Ok(index)
    }

    /// Unsubscribe a topic.  Only valid once subscribed.
    pub fn unsubscribe(&mut self, index: usize) -> Result<()> {
        self.check_timeouts();
        let topic = self.subs.get(index).ok_or(Error::InvalidTopic)?;
        if topic.state != SubState::Subscribed {
            warn!("Can't unsubscribe topic {index} in state {:?}", topic.state);
            return Err(Error::InvalidState);
        }
        let cmd = command_line(format_args!("AT+EMQSUBCLOSE={index}"))?;

        self.subs[index].state = SubState::Unsubscribing;
        self.subs[index].since = self.clock.ticks();

        info!("Unsubscribing topic {index}");
        if let Err(e) = self.command_ok(cmd.as_bytes(), 0) {
            if self.subs[index].state == SubState::Unsubscribing {
                warn!("Unsubscribe topic {index} failed: {e:?}");
                self.subs[index].state = SubState::Subscribed;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Register `topic` for publishing, returning its slot index.
    pub fn pubreg(&mut self, topic: &str) -> Result<usize> {
        self.check_timeouts();
        let Some(index) = self.pubs.iter().position(|t| t.state.is_free()) else {
            warn!("No free publish slot for {topic}");
            return Err(Error::NoFreeSlot);
        };
        let cmd = command_line(format_args!("AT+EMQPUBOPEN={index},\"{topic}\""))?;

        let since = self.clock.ticks();
        self.pubs[index] = PubTopic {
            state: PubState::Registering,
            since,
        };

        info!("Registering {topic} (topic {index})");
        if let Err(e) = self.command_ok(cmd.as_bytes(), 0) {
            if self.pubs[index].state == PubState::Registering {
                warn!("Register {topic} failed: {e:?}");
                self.pubs[index] = PubTopic::default();
                return Err(e);
            }
            debug!("Register {topic}: {e:?}, now {:?}", self.pubs[index].state);
        }
        Ok(index)
    }

    /// Unregister a publish topic.  Only valid once registered.
    pub fn pubunreg(&mut self, index: usize) -> Result<()> {
        self.check_timeouts();
        let topic = self.pubs.get(index).ok_or(Error::InvalidTopic)?;
        if topic.state != PubState::Registered {
            warn!("Can't unregister topic {index} in state {:?}", topic.state);
            return Err(Error::InvalidState);
        }
        let cmd = command_line(format_args!("AT+EMQPUBCLOSE={index}"))?;

        self.pubs[index].state = PubState::Unregistering;
        self.pubs[index].since = self.clock.ticks();

        info!("Unregistering topic {index}");
        if let Err(e) = self.command_ok(cmd.as_bytes(), 0) {
            if self.pubs[index].state == PubState::Unregistering {
                warn!("Unregister topic {index} failed: {e:?}");
                self.pubs[index].state = PubState::Registered;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Publish `data` to a registered topic.
    ///
    /// The payload is hex encoded as it is sent, so needs no buffering.
    pub fn publish(&mut self, index: usize, qos: QoS, data: &[u8]) -> Result<()> {
        self.check_timeouts();
        let topic = self.pubs.get(index).ok_or(Error::InvalidTopic)?;
        if topic.state != PubState::Registered {
            warn!("Can't publish to topic {index} in state {:?}", topic.state);
            return Err(Error::InvalidState);
        }

        let head = command_text(format_args!("AT+EMQPUBLISH={index},{},\"", qos as u8))?;
        debug!("Publishing {} bytes to topic {index}", data.len());
        self.send_raw(head.as_bytes())?;

        let mut hex = [0u8; 64];
        for chunk in data.chunks(hex.len() / 2) {
            let len = encode_hex(chunk, &mut hex)?;
            self.send_raw(&hex[..len])?;
        }
        self.command_ok(b"\"\r\n", 0)
    }

    /// State of subscribe slot `index`.
    pub fn sub_state(&self, index: usize) -> Option<SubState> {
        self.subs.get(index).map(|t| t.state)
    }

    /// State of publish slot `index`.
    pub fn pub_state(&self, index: usize) -> Option<PubState> {
        self.pubs.get(index).map(|t| t.state)
    }

    /// Move slots stuck opening or closing for longer than
    /// `pending_timeout_ms` to the error state.
    pub(super) fn check_timeouts(&mut self) {
        let Some(limit) = self.config.pending_timeout_ms else {
            return;
        };
        let now = self.clock.ticks();

        for (index, topic) in self.subs.iter_mut().enumerate() {
            if topic.state.is_pending() && time_left(topic.since, now, limit) <= 0 {
                warn!("Subscribe topic {index} timed out in {:?}", topic.state);
                topic.state = SubState::Error;
            }
        }
        for (index, topic) in self.pubs.iter_mut().enumerate() {
            if topic.state.is_pending() && time_left(topic.since, now, limit) <= 0 {
                warn!("Publish topic {index} timed out in {:?}", topic.state);
                topic.state = PubState::Error;
            }
        }
    }
}
