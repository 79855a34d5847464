// Licensed under the Apache-2.0 license

use crate::error::UpdateError;
use crate::memory::UpdateTiming;
use crate::regs;
use crate::transport::{RegisterTransport, TransportError};
use crate::update::PatchUpdater;
use core::fmt::{Display, Formatter};
use log::{error, info, warn};
use std::fs;
use std::path::PathBuf;

/// Name of the patch image, relative to the firmware search root.
pub const FIRMWARE_FILE: &str = "cnxt/cx2070x.fw";

/// Where firmware images come from. Boards load them from disk; tests hand
/// over images built in memory.
pub trait FirmwareSource {
    /// Returns the named firmware image, or `None` when it is unavailable.
    fn fetch(&mut self, name: &str) -> Option<Vec<u8>>;
}

/// Loads firmware images from a directory tree.
pub struct DirFirmwareSource {
    root: PathBuf,
}

impl DirFirmwareSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirFirmwareSource { root: root.into() }
    }
}

impl FirmwareSource for DirFirmwareSource {
    fn fetch(&mut self, name: &str) -> Option<Vec<u8>> {
        let path = self.root.join(name);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("firmware {} not available: {}", path.display(), e);
                None
            }
        }
    }
}

/// Version identification read back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub chip_version: u8,
    /// Firmware version as (major, minor).
    pub firmware_version: (u8, u8),
    /// Patch version as (major, minor).
    pub patch_version: (u8, u8),
}

impl FirmwareInfo {
    pub fn read<T: RegisterTransport>(transport: &mut T) -> Result<Self, TransportError> {
        Ok(FirmwareInfo {
            chip_version: transport.read_register(regs::CHIP_VERSION)?,
            firmware_version: (
                transport.read_register(regs::FIRMWARE_VERSION_HI)?,
                transport.read_register(regs::FIRMWARE_VERSION_LO)?,
            ),
            patch_version: (
                transport.read_register(regs::PATCH_VERSION_HI)?,
                transport.read_register(regs::PATCH_VERSION_LO)?,
            ),
        })
    }
}

impl Display for FirmwareInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "CX2070{}, Firmware Version {:x}.{:x}.{:x}.{:x}",
            self.chip_version,
            self.firmware_version.0,
            self.firmware_version.1,
            self.patch_version.0,
            self.patch_version.1
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupOutcome {
    /// The patch downloaded and the device came back ready.
    Updated(FirmwareInfo),
    /// No firmware image was available; the device was left untouched.
    FirmwareUnavailable,
}

/// Drives a complete bringup attempt: obtain the patch image, download it
/// with the register cache bypassed, then read back the device version.
///
/// The cache bypass is dropped again whether or not the download succeeds;
/// a device left behind by a failed download must not also leave the cache
/// wedged in bypass mode.
pub struct Bringup<S: FirmwareSource> {
    source: S,
    firmware_file: String,
    timing: UpdateTiming,
}

impl<S: FirmwareSource> Bringup<S> {
    pub fn new(source: S) -> Self {
        Bringup {
            source,
            firmware_file: FIRMWARE_FILE.to_string(),
            timing: UpdateTiming::default(),
        }
    }

    pub fn with_firmware_file(mut self, name: &str) -> Self {
        self.firmware_file = name.to_string();
        self
    }

    pub fn with_timing(mut self, timing: UpdateTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn run<T: RegisterTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<BringupOutcome, UpdateError> {
        let Some(image) = self.source.fetch(&self.firmware_file) else {
            warn!(
                "firmware {} is not available, leaving the device as is",
                self.firmware_file
            );
            return Ok(BringupOutcome::FirmwareUnavailable);
        };

        transport.set_cache_bypass(true);
        let result = PatchUpdater::new(&mut *transport)
            .with_timing(self.timing)
            .apply(&image);
        transport.set_cache_bypass(false);

        match result {
            Ok(()) => {
                let info = FirmwareInfo::read(transport)?;
                info!("{}", info);
                Ok(BringupOutcome::Updated(info))
            }
            Err(e) => {
                error!("failed to download firmware: {}", e);
                Err(e)
            }
        }
    }
}
