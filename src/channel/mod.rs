//! Bounded receive channel between the transport's interrupt handler
//! (producer) and the protocol engine (consumer).
//!
//! The module streams notifications at any time, so the receive interrupt
//! must buffer bytes until the engine next polls.  If the engine does not
//! poll often enough the channel fills.  Rather than overwriting unread data,
//! [`RxChannel`] drops the newest byte and counts the loss, so callers can
//! detect that they are polling too slowly.
//!
//! Only a single producer and single consumer are supported.  Sharing the
//! channel between interrupt and thread context (a critical section or
//! similar) is the responsibility of the [`crate::io::Transport`]
//! implementation.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use heapless::Deque;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Fixed capacity receive FIFO with overflow accounting.
pub struct RxChannel<const N: usize> {
    queue: Deque<u8, N>,
    overflows: u32,
}

impl<const N: usize> RxChannel<N> {
    /// Create an empty channel.
    ///
    /// ```rust
    /// use etm_link::channel::RxChannel;
    /// static mut UART_RX: RxChannel<2048> = RxChannel::new();
    /// ```
    // const so it can initialise a static.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
            overflows: 0,
        }
    }

    /// Producer: queue one received byte.
    ///
    /// Returns `false`, and counts an overflow, if the channel is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.queue.push_back(byte).is_err() {
            self.overflows = self.overflows.wrapping_add(1);
            false
        } else {
            true
        }
    }

    /// Producer: queue a run of received bytes.
    ///
    /// Returns the number of bytes accepted.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in data {
            if self.push(byte) {
                accepted += 1;
            }
        }
        if accepted < data.len() {
            warn!(
                "Receive channel full, dropped {} bytes",
                data.len() - accepted
            );
        }
        accepted
    }

    /// Consumer: take the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        self.queue.pop_front()
    }

    /// Discard all queued bytes.  The overflow count is kept.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of bytes waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no bytes are waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Number of bytes dropped because the channel was full.
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Reset the overflow count, returning its previous value.
    pub fn take_overflows(&mut self) -> u32 {
        core::mem::take(&mut self.overflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut ch = RxChannel::<8>::new();
        assert_eq!(ch.extend(b"OK\r\n"), 4);
        assert_eq!(ch.len(), 4);
        assert_eq!(ch.pop(), Some(b'O'));
        assert_eq!(ch.pop(), Some(b'K'));
        assert_eq!(ch.pop(), Some(b'\r'));
        assert_eq!(ch.pop(), Some(b'\n'));
        assert_eq!(ch.pop(), None);
    }

    #[test]
    fn test_overflow_drops_newest_and_counts() {
        let mut ch = RxChannel::<4>::new();
        assert_eq!(ch.extend(b"ABCDEF"), 4);
        assert_eq!(ch.overflows(), 2);

        // Unread data is never overwritten
        assert_eq!(ch.pop(), Some(b'A'));
        assert!(ch.push(b'G'));
        assert!(!ch.push(b'H'));
        assert_eq!(ch.overflows(), 3);

        assert_eq!(ch.take_overflows(), 3);
        assert_eq!(ch.overflows(), 0);
    }

    #[test]
    fn test_clear_keeps_overflow_count() {
        let mut ch = RxChannel::<2>::new();
        ch.extend(b"xyz");
        ch.clear();
        assert!(ch.is_empty());
        assert_eq!(ch.capacity(), 2);
        assert_eq!(ch.overflows(), 1);
    }
}
