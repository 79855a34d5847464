// Licensed under the Apache-2.0 license

//! Firmware patch download for the CX2070x (SPoC) audio codec.
//!
//! The codec boots from ROM and accepts firmware patches over its register
//! interface. Bulk memory travels through a small staging buffer: the
//! target address and length are latched into a register block, up to 256
//! payload bytes are written to the buffer window, and a commit register
//! kicks the transfer and reads back busy until the device has drained it.
//!
//! [`transport`] is the seam to the actual bus, [`memory`] implements the
//! staged writer, [`update`] sequences the download phases of a patch
//! image, and [`bringup`] orchestrates a whole update attempt including
//! cache bypass and version readback. The image format itself lives in the
//! `patch-image` crate.

pub mod bringup;
pub mod error;
pub mod memory;
pub mod regs;
pub mod transport;
pub mod update;

pub use bringup::{Bringup, BringupOutcome, DirFirmwareSource, FirmwareInfo, FirmwareSource};
pub use error::UpdateError;
pub use memory::{MemoryRegion, MemoryWriter, UpdateTiming};
pub use transport::{RegisterTransport, ShadowCache, TransportError};
pub use update::{PatchUpdater, UpdatePhase};
