// Licensed under the Apache-2.0 license

use crate::error::UpdateError;
use crate::regs;
use crate::transport::RegisterTransport;
use core::time::Duration;
use log::error;
use patch_image::ImageError;

/// Commit value selecting CPX memory.
pub const COMMIT_CPX: u8 = 0x81;
/// Commit value selecting EEPROM memory.
pub const COMMIT_EEPROM: u8 = 0x83;
/// Commit value selecting SPX memory.
pub const COMMIT_SPX: u8 = 0x85;
/// Or-ed into an SPX commit when the chunk continues the previous one.
pub const COMMIT_CONTINUE: u8 = 0x08;

/// Target memory spaces reachable through the update protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    /// Plain register space, written directly without staging.
    Ctl,
    /// DSP SPX memory.
    Spx,
    /// External EEPROM.
    Eeprom,
    /// DSP CPX memory.
    Cpx,
    /// EEPROM reset vector area; same commit protocol as [`MemoryRegion::Eeprom`].
    EepromReset,
}

impl MemoryRegion {
    fn commit_value(&self, continuation: bool) -> u8 {
        match self {
            MemoryRegion::Ctl => 0,
            MemoryRegion::Cpx => COMMIT_CPX,
            MemoryRegion::Eeprom | MemoryRegion::EepromReset => COMMIT_EEPROM,
            MemoryRegion::Spx => {
                if continuation {
                    COMMIT_SPX | COMMIT_CONTINUE
                } else {
                    COMMIT_SPX
                }
            }
        }
    }

    /// EEPROM programs pages slowly; everything else drains in microseconds.
    fn commit_delay(&self, timing: &UpdateTiming) -> Duration {
        match self {
            MemoryRegion::Eeprom | MemoryRegion::EepromReset => timing.commit_delay_eeprom,
            _ => timing.commit_delay,
        }
    }
}

/// Poll budgets and delays for the download protocol. The defaults are the
/// production cadence; tests zero the delays to run instantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTiming {
    /// Status reads allowed for one staged commit before giving up.
    pub commit_attempts: u32,
    /// Delay between commit status reads for DSP memory.
    pub commit_delay: Duration,
    /// Delay between commit status reads for EEPROM memory.
    pub commit_delay_eeprom: Duration,
    /// Reads allowed for the ready handshake after the loader download.
    pub ready_attempts: u32,
    /// Reads allowed for the ready handshake after a software reset.
    pub reset_attempts: u32,
    /// Delay between ready handshake reads.
    pub ready_delay: Duration,
}

impl Default for UpdateTiming {
    fn default() -> Self {
        UpdateTiming {
            commit_attempts: 30,
            commit_delay: Duration::from_micros(1),
            commit_delay_eeprom: Duration::from_millis(5),
            ready_attempts: 50,
            reset_attempts: 50,
            ready_delay: Duration::from_millis(1),
        }
    }
}

impl UpdateTiming {
    /// The production budgets with all delays zeroed.
    pub fn immediate() -> Self {
        UpdateTiming {
            commit_delay: Duration::ZERO,
            commit_delay_eeprom: Duration::ZERO,
            ready_delay: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// One download session through the staging buffer.
///
/// A write is split into chunks of at most [`regs::MAX_MEM_BUF`] bytes. The
/// first chunk latches the target address and chunk length, every chunk is
/// staged at [`regs::UPDATE_BUFFER`] and committed through
/// [`regs::UPDATE_CTL`], and the commit is polled until the device clears
/// the pending bit. Continuation chunks skip the latch; the device advances
/// the target address itself, so the latch must only be touched at the
/// start of an address-contiguous run.
pub struct MemoryWriter<'t, T: RegisterTransport> {
    transport: &'t mut T,
    timing: UpdateTiming,
}

impl<'t, T: RegisterTransport> MemoryWriter<'t, T> {
    pub fn new(transport: &'t mut T, timing: UpdateTiming) -> Self {
        MemoryWriter { transport, timing }
    }

    /// Writes `data` to `addr` in the given memory region. Empty writes are
    /// no-ops. Direct register writes ([`MemoryRegion::Ctl`]) must stay
    /// inside the 16-bit register file.
    pub fn write(
        &mut self,
        region: MemoryRegion,
        addr: u32,
        data: &[u8],
    ) -> Result<(), UpdateError> {
        if region == MemoryRegion::Ctl {
            let end = addr as usize + data.len();
            if addr > u16::MAX as u32 || end > u16::MAX as usize + 1 {
                return Err(ImageError::LoaderAddress { addr }.into());
            }
            self.transport.write_block(addr as u16, data)?;
            return Ok(());
        }

        let mut continuation = false;
        for chunk in data.chunks(regs::MAX_MEM_BUF) {
            if !continuation {
                self.write_latch(addr, chunk.len())?;
            }
            self.transport.write_block(regs::UPDATE_BUFFER, chunk)?;
            self.transport
                .write_register(regs::UPDATE_CTL, region.commit_value(continuation))?;
            self.poll_commit(region)?;
            continuation = true;
        }
        Ok(())
    }

    fn write_latch(&mut self, addr: u32, chunk_len: usize) -> Result<(), UpdateError> {
        let addr = addr.to_be_bytes();
        let block = [addr[3], addr[2], addr[1], (chunk_len - 1) as u8];
        self.transport.write_block(regs::UPDATE_ADDR_LOW, &block)?;
        Ok(())
    }

    fn poll_commit(&mut self, region: MemoryRegion) -> Result<(), UpdateError> {
        let delay = region.commit_delay(&self.timing);
        for _ in 0..self.timing.commit_attempts {
            let status = self.transport.read_register(regs::UPDATE_CTL)?;
            if status & regs::UPDATE_PENDING == 0 {
                return Ok(());
            }
            std::thread::sleep(delay);
        }
        error!(
            "memory update still pending after {} status reads",
            self.timing.commit_attempts
        );
        Err(UpdateError::DeviceBusy)
    }
}
