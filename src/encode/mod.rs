// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! Encoders for the serial and USB-MIDI wire formats
//!
//! BLE-MIDI packets are assembled by the BLE packet builder instead.

mod serial;
pub use self::serial::SerialMidiEncoder;

#[cfg(feature = "usb")]
mod usb;
#[cfg(feature = "usb")]
pub use self::usb::UsbMidiEncoder;
