//! Collation of image bytes into flash double-words, with the image
//! checksum calculated on the way through.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Value of erased flash, used to pad a final partial double-word
pub const ERASED: u8 = 0xFF;

/// Collects image bytes into 64-bit double-words.
///
/// Bytes are inserted at the top of the current 32-bit word, shifting
/// earlier bytes down, so after 4 bytes the first sits in the least
/// significant position.  A completed double-word is
/// `(word1 << 32) | word0`, which lays the bytes out in flash in the order
/// they were received.
///
/// The checksum is the XOR of every big-endian 16-bit pair.  An odd final
/// byte is folded in on its own by [`Collator::finish`].
#[derive(Debug, Default, Clone)]
pub struct Collator {
    words: [u32; 2],
    count: usize,
    pair: u16,
    checksum: u16,
    total: u32,
}

impl Collator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one image byte, returning a double-word once 8 are held.
    pub fn push(&mut self, byte: u8) -> Option<u64> {
        self.pair = (self.pair << 8) | u16::from(byte);
        self.total += 1;
        if self.total % 2 == 0 {
            self.checksum ^= self.pair;
            self.pair = 0;
        }
        self.insert(byte)
    }

    /// Complete the image.
    ///
    /// Folds any odd final byte into the checksum, and returns the final
    /// partial double-word padded with [`ERASED`], if there is one.  Padding
    /// is not part of the checksum.
    pub fn finish(&mut self) -> Option<u64> {
        if self.total % 2 != 0 {
            self.checksum ^= self.pair;
            self.pair = 0;
            // Further calls must not fold it in again
            self.total += 1;
        }
        if self.count == 0 {
            return None;
        }

        let mut dword = None;
        while dword.is_none() {
            dword = self.insert(ERASED);
        }
        dword
    }

    /// Checksum of the bytes pushed so far.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    fn insert(&mut self, byte: u8) -> Option<u64> {
        let word = &mut self.words[self.count / 4];
        *word = (*word >> 8) | (u32::from(byte) << 24);
        self.count += 1;

        if self.count < 8 {
            return None;
        }
        let dword = (u64::from(self.words[1]) << 32) | u64::from(self.words[0]);
        self.words = [0; 2];
        self.count = 0;
        Some(dword)
    }
}
