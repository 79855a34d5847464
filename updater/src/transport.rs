// Licensed under the Apache-2.0 license

use crate::regs;
use core::fmt::{Display, Formatter};

// This module provides the seam between the download protocol and the bus.
// The codec exposes 8-bit registers behind 16-bit addresses; how those
// transfers happen (I2C, SPI, a test model) is the transport's business.
// ShadowCache can wrap any transport to serve reads from a register shadow,
// with a bypass switch for traffic that must not be cached.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The device did not acknowledge the transfer.
    Nack,
    /// The bus transaction failed.
    Bus,
    /// The bus transaction timed out.
    Timeout,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Nack => write!(f, "device did not acknowledge"),
            TransportError::Bus => write!(f, "bus transaction failed"),
            TransportError::Timeout => write!(f, "bus transaction timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

pub trait RegisterTransport {
    /// Reads one register.
    fn read_register(&mut self, reg: u16) -> Result<u8, TransportError>;

    /// Writes one register.
    fn write_register(&mut self, reg: u16, value: u8) -> Result<(), TransportError>;

    /// Writes consecutive registers starting at `reg`. Bus drivers that can
    /// burst should override this; the default falls back to one write per
    /// register.
    fn write_block(&mut self, reg: u16, data: &[u8]) -> Result<(), TransportError> {
        for (i, &value) in data.iter().enumerate() {
            self.write_register(reg + i as u16, value)?;
        }
        Ok(())
    }

    /// Switches a register cache in front of the bus into or out of bypass
    /// mode. Transports without a cache ignore this.
    fn set_cache_bypass(&mut self, _bypass: bool) {}
}

/// Register shadow in front of a bus transport. Reads are served from the
/// shadow once a value is known; writes go to the bus and refresh the
/// shadow. In bypass mode every access goes straight to the bus and the
/// shadow is left untouched, so a firmware download does not pollute the
/// cached register state.
pub struct ShadowCache<T: RegisterTransport> {
    inner: T,
    shadow: Vec<Option<u8>>,
    bypass: bool,
}

impl<T: RegisterTransport> ShadowCache<T> {
    pub fn new(inner: T) -> Self {
        ShadowCache {
            inner,
            shadow: vec![None; regs::REGISTER_SPACE],
            bypass: false,
        }
    }

    /// Seeds the shadow with known reset defaults so they never hit the bus.
    pub fn with_defaults(inner: T, defaults: &[(u16, u8)]) -> Self {
        let mut cache = Self::new(inner);
        for &(reg, value) in defaults {
            if let Some(slot) = cache.shadow.get_mut(reg as usize) {
                *slot = Some(value);
            }
        }
        cache
    }

    pub fn bypassed(&self) -> bool {
        self.bypass
    }

    /// The cached value of a register, if any.
    pub fn cached(&self, reg: u16) -> Option<u8> {
        self.shadow.get(reg as usize).copied().flatten()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn refresh(&mut self, reg: u16, value: u8) {
        if let Some(slot) = self.shadow.get_mut(reg as usize) {
            *slot = Some(value);
        }
    }
}

impl<T: RegisterTransport> RegisterTransport for ShadowCache<T> {
    fn read_register(&mut self, reg: u16) -> Result<u8, TransportError> {
        if !self.bypass {
            if let Some(value) = self.cached(reg) {
                return Ok(value);
            }
        }
        let value = self.inner.read_register(reg)?;
        if !self.bypass {
            self.refresh(reg, value);
        }
        Ok(value)
    }

    fn write_register(&mut self, reg: u16, value: u8) -> Result<(), TransportError> {
        self.inner.write_register(reg, value)?;
        if !self.bypass {
            self.refresh(reg, value);
        }
        Ok(())
    }

    fn write_block(&mut self, reg: u16, data: &[u8]) -> Result<(), TransportError> {
        self.inner.write_block(reg, data)?;
        if !self.bypass {
            for (i, &value) in data.iter().enumerate() {
                self.refresh(reg + i as u16, value);
            }
        }
        Ok(())
    }

    fn set_cache_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }
}
