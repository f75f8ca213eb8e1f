//! Keywords recognised in the module's output, and the streaming matcher
//! that finds them.
//!
//! Every keyword is a literal byte string: a reply terminator (`OK\r\n`), a
//! notification prefix (`+EMQSUBOPEN:`) or a complete marker
//! (`+ETM:IDLE\r\n`).  [`Matcher`] tracks how far through each keyword the
//! input has matched, independently and in parallel, so keywords that share
//! a prefix are all scanned correctly.
//!
//! [`KeywordSet`] is a bitset over [`Keyword`], used by callers to say which
//! keywords they are waiting for and which ones are always notifications.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::ops::BitOr;

/// Number of entries in [`KEYWORDS`]
pub const NUM_KEYWORDS: usize = 17;

/// A recognisable keyword.
///
/// Discriminants are the keyword's position in [`KEYWORDS`], which is also
/// its match priority.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `:SEND OK\r\n`
    SendOk = 0,
    /// `:SEND FAIL\r\n`
    SendFail,
    /// `+ETM:IDLE\r\n` - module ready
    Idle,
    /// `+EMQ:` - message delivery
    MqttRecv,
    /// `+ETM:EMQRDY\r\n` - MQTT mode ready
    MqttReady,
    /// `+EMQSUBOPEN:`
    SubOpen,
    /// `+EMQSUBCLOSE:`
    SubClose,
    /// `+EMQPUBOPEN:`
    PubOpen,
    /// `+EMQPUBCLOSE:`
    PubClose,
    /// `+ETM:EURDY\r\n` - UDP mode ready
    UdpReady,
    /// `+ETMSTATE:` - connectivity state
    State,
    /// `APP RDY` - modem application started
    AppReady,
    /// `+ETMHFWGET:` - host firmware availability
    FwAvailable,
    /// `+CME ERROR:`
    CmeError,
    /// `OK\r\n`
    Ok,
    /// `ERROR\r\n`
    Error,
    /// `\r\n`
    Crlf,
}

/// The keyword table, in priority order.
///
/// Where several keywords complete on the same byte (`:SEND OK\r\n`,
/// `OK\r\n` and `\r\n` all end together) the earliest entry wins, so more
/// specific keywords must precede the keywords they end with.
pub const KEYWORDS: [(Keyword, &[u8]); NUM_KEYWORDS] = [
    (Keyword::SendOk, b":SEND OK\r\n"),
    (Keyword::SendFail, b":SEND FAIL\r\n"),
    (Keyword::Idle, b"+ETM:IDLE\r\n"),
    (Keyword::MqttRecv, b"+EMQ:"),
    (Keyword::MqttReady, b"+ETM:EMQRDY\r\n"),
    (Keyword::SubOpen, b"+EMQSUBOPEN:"),
    (Keyword::SubClose, b"+EMQSUBCLOSE:"),
    (Keyword::PubOpen, b"+EMQPUBOPEN:"),
    (Keyword::PubClose, b"+EMQPUBCLOSE:"),
    (Keyword::UdpReady, b"+ETM:EURDY\r\n"),
    (Keyword::State, b"+ETMSTATE:"),
    (Keyword::AppReady, b"APP RDY"),
    (Keyword::FwAvailable, b"+ETMHFWGET:"),
    (Keyword::CmeError, b"+CME ERROR:"),
    (Keyword::Ok, b"OK\r\n"),
    (Keyword::Error, b"ERROR\r\n"),
    (Keyword::Crlf, b"\r\n"),
];

impl Keyword {
    /// This keyword's bit within a [`KeywordSet`]
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    /// The literal text of this keyword
    pub fn text(self) -> &'static [u8] {
        KEYWORDS[self as usize].1
    }
}

/// A set of [`Keyword`]s.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeywordSet(u32);

impl KeywordSet {
    pub const EMPTY: Self = Self(0);

    /// A command's final reply: `OK` or `ERROR`
    pub const REPLY: Self = Self::of(Keyword::Ok).with(Keyword::Error);

    /// Keywords which are always notifications, whatever the caller is
    /// waiting for
    pub const PERSISTENT: Self = Self::of(Keyword::SendOk)
        .with(Keyword::SendFail)
        .with(Keyword::Idle)
        .with(Keyword::MqttRecv)
        .with(Keyword::MqttReady)
        .with(Keyword::SubOpen)
        .with(Keyword::SubClose)
        .with(Keyword::PubOpen)
        .with(Keyword::PubClose)
        .with(Keyword::UdpReady)
        .with(Keyword::State)
        .with(Keyword::AppReady)
        .with(Keyword::FwAvailable)
        .with(Keyword::Crlf);

    pub const fn of(keyword: Keyword) -> Self {
        Self(keyword.bit())
    }

    pub const fn with(self, keyword: Keyword) -> Self {
        Self(self.0 | keyword.bit())
    }

    pub const fn without(self, keyword: Keyword) -> Self {
        Self(self.0 & !keyword.bit())
    }

    pub const fn contains(self, keyword: Keyword) -> bool {
        self.0 & keyword.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the members in priority order
    pub fn iter(self) -> impl Iterator<Item = Keyword> {
        (0..NUM_KEYWORDS)
            .map(|i| KEYWORDS[i].0)
            .filter(move |kw| self.contains(*kw))
    }
}

impl From<Keyword> for KeywordSet {
    fn from(keyword: Keyword) -> Self {
        Self::of(keyword)
    }
}

impl BitOr for Keyword {
    type Output = KeywordSet;

    fn bitor(self, rhs: Keyword) -> KeywordSet {
        KeywordSet::of(self).with(rhs)
    }
}

impl BitOr<Keyword> for KeywordSet {
    type Output = KeywordSet;

    fn bitor(self, rhs: Keyword) -> KeywordSet {
        self.with(rhs)
    }
}

impl BitOr for KeywordSet {
    type Output = KeywordSet;

    fn bitor(self, rhs: KeywordSet) -> KeywordSet {
        KeywordSet(self.0 | rhs.0)
    }
}

/// Streaming multi-keyword matcher.
///
/// Holds one partial-match position per keyword.  A byte that continues a
/// keyword advances its position; any other byte resets that keyword alone
/// (to 1 if the byte starts the keyword afresh, otherwise 0).
#[derive(Debug, Clone)]
pub struct Matcher {
    index: [u8; NUM_KEYWORDS],
}

impl Matcher {
    pub const fn new() -> Self {
        Self {
            index: [0; NUM_KEYWORDS],
        }
    }

    /// Forget all partial matches.
    pub fn reset(&mut self) {
        self.index = [0; NUM_KEYWORDS];
    }

    /// Feed one byte, returning the keyword it completes, if any.
    ///
    /// At most one keyword is reported per byte, the highest priority one.
    /// Completing a keyword consumes it: every partial match is reset.
    pub fn feed(&mut self, byte: u8) -> Option<Keyword> {
        let mut found = None;

        for (pos, (keyword, text)) in self.index.iter_mut().zip(KEYWORDS.iter()) {
            let next = if text[*pos as usize] == byte {
                *pos + 1
            } else if text[0] == byte {
                1
            } else {
                0
            };
            *pos = next;

            if next as usize == text.len() && found.is_none() {
                found = Some(*keyword);
            }
        }

        if found.is_some() {
            self.reset();
        }
        found
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}
