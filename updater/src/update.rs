// Licensed under the Apache-2.0 license

use crate::error::UpdateError;
use crate::memory::{MemoryRegion, MemoryWriter, UpdateTiming};
use crate::regs;
use crate::transport::RegisterTransport;
use core::fmt::{Display, Formatter};
use log::{debug, error, info};
use patch_image::{ImageError, PatchImage, SegmentKind};

/// Lower 24 bits of an SPX record address are the device address; the top
/// byte is bank metadata the device does not take.
const SPX_ADDR_MASK: u32 = 0x00ff_ffff;

/// The ordered phases of a patch download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Mute outputs and hold off stream setup.
    Prepare,
    /// Loader records written straight into register space.
    Loader,
    /// CPX code records through the staging buffer.
    Cpx,
    /// SPX data records through the staging buffer.
    Spx,
    /// Software reset and the final ready handshake.
    Reset,
}

impl Display for UpdatePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            UpdatePhase::Prepare => write!(f, "prepare"),
            UpdatePhase::Loader => write!(f, "loader download"),
            UpdatePhase::Cpx => write!(f, "cpx download"),
            UpdatePhase::Spx => write!(f, "spx download"),
            UpdatePhase::Reset => write!(f, "software reset"),
        }
    }
}

/// Downloads a firmware patch image into the device, phase by phase. Any
/// failure aborts the download; the caller decides whether to retry with a
/// fresh updater.
pub struct PatchUpdater<'t, T: RegisterTransport> {
    transport: &'t mut T,
    timing: UpdateTiming,
}

impl<'t, T: RegisterTransport> PatchUpdater<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        PatchUpdater {
            transport,
            timing: UpdateTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: UpdateTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Validates the image and runs the full download sequence: prepare,
    /// loader, ready handshake, CPX, SPX, software reset, ready handshake.
    pub fn apply(&mut self, image_bytes: &[u8]) -> Result<(), UpdateError> {
        let image = PatchImage::parse(image_bytes)?;
        if !image.is_patch() {
            error!("firmware image carries no patch marker");
            return Err(ImageError::NotAPatch.into());
        }
        info!(
            "updating firmware patch: {} [{}]",
            image.description(),
            image.version_string()
        );

        // Silence the output path first so the download does not pop the
        // speakers, then keep the DSP from starting streams on stale code.
        debug!("entering {}", UpdatePhase::Prepare);
        self.transport
            .write_register(regs::OUTPUT_CONTROL, 0)
            .map_err(|e| {
                error!("failed to turn outputs off: {}", e);
                UpdateError::from(e)
            })?;
        self.transport
            .write_register(regs::DSP_INIT_NEWC, 1)
            .map_err(|e| {
                error!("failed to hold off stream setup: {}", e);
                UpdateError::from(e)
            })?;

        debug!(
            "entering {}, {} bytes",
            UpdatePhase::Loader,
            image.segment_len(SegmentKind::Loader)
        );
        {
            let mut writer = MemoryWriter::new(&mut *self.transport, self.timing);
            for record in image.records(SegmentKind::Loader) {
                let record = record?;
                writer
                    .write(MemoryRegion::Ctl, record.addr, record.data)
                    .map_err(|e| {
                        error!("failed to download loader code: {}", e);
                        e
                    })?;
            }
        }
        self.wait_ready(UpdatePhase::Loader, self.timing.ready_attempts)?;

        let mut writer = MemoryWriter::new(&mut *self.transport, self.timing);
        debug!(
            "entering {}, {} bytes",
            UpdatePhase::Cpx,
            image.segment_len(SegmentKind::Cpx)
        );
        for record in image.records(SegmentKind::Cpx) {
            let record = record?;
            writer
                .write(MemoryRegion::Cpx, record.addr, record.data)
                .map_err(|e| {
                    error!("failed to update CPX code: {}", e);
                    e
                })?;
        }

        debug!(
            "entering {}, {} bytes",
            UpdatePhase::Spx,
            image.segment_len(SegmentKind::Spx)
        );
        for record in image.records(SegmentKind::Spx) {
            let record = record?;
            writer
                .write(MemoryRegion::Spx, record.addr & SPX_ADDR_MASK, record.data)
                .map_err(|e| {
                    error!("failed to update SPX code: {}", e);
                    e
                })?;
        }
        drop(writer);

        debug!("entering {}", UpdatePhase::Reset);
        self.transport.write_register(regs::ABCODE, 0x00)?;
        self.wait_ready(UpdatePhase::Reset, self.timing.reset_attempts)?;

        debug!("firmware patch downloaded");
        Ok(())
    }

    /// Polls [`regs::ABCODE`] until the device reports ready. Failed status
    /// reads count against the budget but do not abort the handshake; the
    /// device is briefly unreachable while it reboots. If the budget runs
    /// out the last read error wins, otherwise the phase timed out.
    fn wait_ready(&mut self, phase: UpdatePhase, attempts: u32) -> Result<(), UpdateError> {
        let mut last_err = None;
        for _ in 0..attempts {
            match self.transport.read_register(regs::ABCODE) {
                Ok(regs::ABCODE_READY) => return Ok(()),
                Ok(_) => last_err = None,
                Err(e) => last_err = Some(e),
            }
            std::thread::sleep(self.timing.ready_delay);
        }
        error!(
            "device not ready after {} reads during {}",
            attempts, phase
        );
        match last_err {
            Some(e) => Err(e.into()),
            None => Err(UpdateError::DeviceTimeout(phase)),
        }
    }
}
