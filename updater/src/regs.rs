// Licensed under the Apache-2.0 license

//! CX2070x register map, limited to the registers the patch download
//! protocol touches. Registers are 8 bits wide behind 16-bit addresses.

/// Memory update target address, low byte.
pub const UPDATE_ADDR_LOW: u16 = 0x02fc;
/// Memory update target address, middle byte.
pub const UPDATE_ADDR_MID: u16 = 0x02fd;
/// Memory update target address, high byte.
pub const UPDATE_ADDR_HIGH: u16 = 0x02fe;
/// Staged byte count minus one.
pub const UPDATE_LEN: u16 = 0x02ff;
/// Start of the staging buffer window.
pub const UPDATE_BUFFER: u16 = 0x0300;
/// Memory update control; a commit value starts the transfer and
/// [`UPDATE_PENDING`] reads back until the device has drained the buffer.
pub const UPDATE_CTL: u16 = 0x0400;

/// DSP boot state; reads [`ABCODE_READY`] once the firmware is up, and a
/// write of zero forces a software reset.
pub const ABCODE: u16 = 0x1000;
pub const FIRMWARE_VERSION_LO: u16 = 0x1001;
pub const FIRMWARE_VERSION_HI: u16 = 0x1002;
pub const PATCH_VERSION_LO: u16 = 0x1003;
pub const PATCH_VERSION_HI: u16 = 0x1004;
pub const CHIP_VERSION: u16 = 0x1005;
/// Output routing control; cleared during a download to keep the speaker
/// path silent.
pub const OUTPUT_CONTROL: u16 = 0x1019;
/// Holds off DSP stream setup while new code is downloaded.
pub const DSP_INIT_NEWC: u16 = 0x117d;

/// Number of addressable registers.
pub const REGISTER_SPACE: usize = 0x1600;

/// Capacity of the staging buffer; one commit moves at most this many bytes.
pub const MAX_MEM_BUF: usize = 0x100;

/// Busy bit in [`UPDATE_CTL`] while a commit is in flight.
pub const UPDATE_PENDING: u8 = 0x80;
/// [`ABCODE`] value once the device is up and accepting commands.
pub const ABCODE_READY: u8 = 0x01;
