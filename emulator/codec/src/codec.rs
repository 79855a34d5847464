/*++

Licensed under the Apache-2.0 license.

File Name:

    codec.rs

Abstract:

    File contains a register-level emulation of the CX2070x audio codec,
    covering the firmware patch download protocol.

--*/

use cx2070x_updater::memory::{COMMIT_CONTINUE, COMMIT_CPX, COMMIT_EEPROM, COMMIT_SPX};
use cx2070x_updater::regs::{
    ABCODE, ABCODE_READY, CHIP_VERSION, FIRMWARE_VERSION_HI, FIRMWARE_VERSION_LO, MAX_MEM_BUF,
    OUTPUT_CONTROL, PATCH_VERSION_HI, PATCH_VERSION_LO, REGISTER_SPACE, UPDATE_ADDR_HIGH,
    UPDATE_ADDR_LOW, UPDATE_ADDR_MID, UPDATE_BUFFER, UPDATE_CTL, UPDATE_LEN, UPDATE_PENDING,
};
use cx2070x_updater::{MemoryRegion, RegisterTransport, TransportError};
use log::{debug, warn};
use std::collections::BTreeMap;

const DEFAULT_CHIP_VERSION: u8 = 0x02;
const DEFAULT_FIRMWARE_VERSION: (u8, u8) = (0x05, 0x0c);
const DEFAULT_PATCH_VERSION: (u8, u8) = (0x21, 0x05);

/// Software model of the codec's register interface.
///
/// The model implements the staged memory update protocol: writes into the
/// staging buffer window collect bytes, the address/length latch registers
/// select the target, and a commit through the update control register
/// moves the staged bytes into the selected memory. A commit that follows
/// a latch write starts a new transfer at the latched address; a commit
/// with the latch untouched continues at the auto-incremented cursor, and
/// an SPX continuation must carry the continuation flag. The busy bit
/// stays set for a configurable number of status reads after each commit,
/// and the boot handshake register reports ready after a configurable
/// number of reads, re-armed by a software reset.
///
/// Anything a real device would reject or silently misbehave on is
/// recorded as a protocol violation that tests can assert against.
pub struct CodecModel {
    regs: Vec<u8>,
    latch_addr: [u8; 3],
    latch_len: u8,
    /// Set by a latch register write, consumed by the next commit.
    latch_fresh: bool,
    staged: Vec<u8>,
    /// Base commit value and append address for a follow-on commit.
    cursor: Option<(u8, u32)>,
    cpx: BTreeMap<u32, u8>,
    spx: BTreeMap<u32, u8>,
    eeprom: BTreeMap<u32, u8>,
    busy_remaining: u32,
    commit_busy_reads: u32,
    always_busy: bool,
    boot_reads: u32,
    boot_remaining: u32,
    never_ready: bool,
    commits: usize,
    resets: usize,
    violations: Vec<String>,
}

impl Default for CodecModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecModel {
    pub fn new() -> Self {
        let mut model = CodecModel {
            regs: vec![0; REGISTER_SPACE],
            latch_addr: [0; 3],
            latch_len: 0,
            latch_fresh: false,
            staged: Vec::new(),
            cursor: None,
            cpx: BTreeMap::new(),
            spx: BTreeMap::new(),
            eeprom: BTreeMap::new(),
            busy_remaining: 0,
            commit_busy_reads: 1,
            always_busy: false,
            boot_reads: 2,
            boot_remaining: 2,
            never_ready: false,
            commits: 0,
            resets: 0,
            violations: Vec::new(),
        };
        model.regs[OUTPUT_CONTROL as usize] = 0x03;
        model.regs[CHIP_VERSION as usize] = DEFAULT_CHIP_VERSION;
        model.regs[FIRMWARE_VERSION_HI as usize] = DEFAULT_FIRMWARE_VERSION.0;
        model.regs[FIRMWARE_VERSION_LO as usize] = DEFAULT_FIRMWARE_VERSION.1;
        model.regs[PATCH_VERSION_HI as usize] = DEFAULT_PATCH_VERSION.0;
        model.regs[PATCH_VERSION_LO as usize] = DEFAULT_PATCH_VERSION.1;
        model
    }

    /// Status reads that report busy after each commit.
    pub fn with_commit_busy_reads(mut self, reads: u32) -> Self {
        self.commit_busy_reads = reads;
        self
    }

    /// Boot handshake reads that report not-ready, initially and after
    /// every software reset.
    pub fn with_boot_reads(mut self, reads: u32) -> Self {
        self.boot_reads = reads;
        self.boot_remaining = reads;
        self
    }

    /// Commits never finish; every status read reports busy.
    pub fn always_busy(mut self) -> Self {
        self.always_busy = true;
        self
    }

    /// The boot handshake never reports ready.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Raw register file peek.
    pub fn register(&self, reg: u16) -> u8 {
        self.regs.get(reg as usize).copied().unwrap_or(0)
    }

    /// Reads back `len` bytes of a memory region. Returns `None` when any
    /// byte in the range was never written.
    pub fn read_memory(&self, region: MemoryRegion, addr: u32, len: usize) -> Option<Vec<u8>> {
        if region == MemoryRegion::Ctl {
            let start = addr as usize;
            let end = start.checked_add(len)?;
            return self.regs.get(start..end).map(|bytes| bytes.to_vec());
        }
        let memory = match region {
            MemoryRegion::Cpx => &self.cpx,
            MemoryRegion::Spx => &self.spx,
            _ => &self.eeprom,
        };
        (0..len)
            .map(|i| memory.get(&(addr + i as u32)).copied())
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Protocol violations observed so far. A clean download leaves this
    /// empty.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    fn violation(&mut self, message: String) {
        warn!("protocol violation: {}", message);
        self.violations.push(message);
    }

    fn in_buffer_window(reg: u16) -> bool {
        (UPDATE_BUFFER..UPDATE_BUFFER + MAX_MEM_BUF as u16).contains(&reg)
    }

    fn latched_addr(&self) -> u32 {
        u32::from(self.latch_addr[0])
            | u32::from(self.latch_addr[1]) << 8
            | u32::from(self.latch_addr[2]) << 16
    }

    fn handle_read(&mut self, reg: u16) -> u8 {
        match reg {
            UPDATE_CTL => {
                if self.always_busy {
                    return UPDATE_PENDING;
                }
                if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                    UPDATE_PENDING
                } else {
                    0x00
                }
            }
            ABCODE => {
                if self.never_ready {
                    return 0x00;
                }
                if self.boot_remaining > 0 {
                    self.boot_remaining -= 1;
                    0x00
                } else {
                    ABCODE_READY
                }
            }
            _ => match self.regs.get(reg as usize).copied() {
                Some(value) => value,
                None => {
                    self.violation(format!(
                        "read of register {:#06x} outside the register file",
                        reg
                    ));
                    0
                }
            },
        }
    }

    fn handle_write(&mut self, reg: u16, value: u8) {
        match self.regs.get_mut(reg as usize) {
            Some(slot) => *slot = value,
            None => {
                self.violation(format!(
                    "write to register {:#06x} outside the register file",
                    reg
                ));
                return;
            }
        }
        match reg {
            UPDATE_ADDR_LOW => {
                self.latch_addr[0] = value;
                self.latch_fresh = true;
            }
            UPDATE_ADDR_MID => {
                self.latch_addr[1] = value;
                self.latch_fresh = true;
            }
            UPDATE_ADDR_HIGH => {
                self.latch_addr[2] = value;
                self.latch_fresh = true;
            }
            UPDATE_LEN => {
                self.latch_len = value;
                self.latch_fresh = true;
            }
            UPDATE_CTL => self.commit(value),
            ABCODE => self.software_reset(value),
            _ if Self::in_buffer_window(reg) => self.stage(reg, value),
            _ => {}
        }
    }

    fn stage(&mut self, reg: u16, value: u8) {
        if self.staged.len() >= MAX_MEM_BUF {
            self.violation("staging buffer overflow".to_string());
            return;
        }
        let expected = UPDATE_BUFFER + self.staged.len() as u16;
        if reg != expected {
            self.violation(format!(
                "staging write at {:#06x}, expected {:#06x}",
                reg, expected
            ));
        }
        self.staged.push(value);
    }

    fn commit(&mut self, value: u8) {
        let flagged = value & COMMIT_CONTINUE != 0;
        let base = value & !COMMIT_CONTINUE;
        let target = match base {
            COMMIT_CPX => "CPX",
            COMMIT_EEPROM => "EEPROM",
            COMMIT_SPX => "SPX",
            _ => {
                self.violation(format!("unknown commit value {:#04x}", value));
                self.staged.clear();
                return;
            }
        };
        if flagged && base != COMMIT_SPX {
            self.violation(format!("continuation flag on a {} commit", target));
        }
        if self.staged.is_empty() {
            self.violation(format!("commit {:#04x} with an empty staging buffer", value));
            return;
        }
        let fresh = self.latch_fresh;
        self.latch_fresh = false;
        let addr = if fresh {
            if flagged {
                self.violation("continuation flag on a freshly latched commit".to_string());
            }
            let latched = self.latch_len as usize + 1;
            if self.staged.len() != latched {
                self.violation(format!(
                    "staged {} bytes but the latched length is {}",
                    self.staged.len(),
                    latched
                ));
            }
            self.latched_addr()
        } else {
            if base == COMMIT_SPX && !flagged {
                self.violation("SPX continuation without the continuation flag".to_string());
            }
            match self.cursor {
                Some((cursor_base, addr)) if cursor_base == base => addr,
                _ => {
                    self.violation(
                        "continuation commit does not follow a matching commit".to_string(),
                    );
                    self.staged.clear();
                    return;
                }
            }
        };

        debug!(
            "commit {:#04x}: {} bytes to {} at {:#08x}",
            value,
            self.staged.len(),
            target,
            addr
        );
        let staged = std::mem::take(&mut self.staged);
        let memory = match base {
            COMMIT_CPX => &mut self.cpx,
            COMMIT_SPX => &mut self.spx,
            _ => &mut self.eeprom,
        };
        for (i, &byte) in staged.iter().enumerate() {
            memory.insert(addr + i as u32, byte);
        }
        self.cursor = Some((base, addr + staged.len() as u32));
        self.busy_remaining = self.commit_busy_reads;
        self.commits += 1;
    }

    fn software_reset(&mut self, value: u8) {
        if value != 0 {
            self.violation(format!("unexpected boot state write {:#04x}", value));
            return;
        }
        debug!("software reset, device booting");
        self.resets += 1;
        self.boot_remaining = self.boot_reads;
    }
}

impl RegisterTransport for CodecModel {
    fn read_register(&mut self, reg: u16) -> Result<u8, TransportError> {
        Ok(self.handle_read(reg))
    }

    fn write_register(&mut self, reg: u16, value: u8) -> Result<(), TransportError> {
        self.handle_write(reg, value);
        Ok(())
    }
}
