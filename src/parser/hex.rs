// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use super::BytePuller;

/// Parses hexadecimal ASCII text into bytes.
///
/// Pairs of hex digits form a byte. A single digit that is followed by
/// any other character is a byte on its own, e.g. `"7f A 123456"` yields
/// `7F 0A 12 34 56`.
#[derive(Debug, Clone)]
pub struct HexPuller<P> {
    chars: P,
    pending: Option<u8>,
}

impl<P> HexPuller<P>
where
    P: BytePuller,
{
    #[must_use]
    pub const fn new(chars: P) -> Self {
        Self {
            chars,
            pending: None,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> P {
        self.chars
    }
}

impl<P> BytePuller for HexPuller<P>
where
    P: BytePuller,
{
    fn pull_byte(&mut self) -> Option<u8> {
        while let Some(ascii) = self.chars.pull_byte() {
            let Some(nibble) = char::from(ascii).to_digit(16) else {
                if let Some(high) = self.pending.take() {
                    return Some(high);
                }
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let nibble = nibble as u8;
            match self.pending.take() {
                Some(high) => return Some((high << 4) | nibble),
                None => self.pending = Some(nibble),
            }
        }
        // A trailing single digit is only complete when followed by a separator
        None
    }
}
