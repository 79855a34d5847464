// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use cx2070x_updater::{FirmwareSource, RegisterTransport, TransportError};
use emulator_codec::CodecModel;
use log::LevelFilter;
use patch_image::{PatchBuilder, SegmentKind};
use simple_logger::SimpleLogger;

/// Initializes test logging (only once).
pub fn init_logging() {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

pub const LOADER_ADDR: u32 = 0x117e;
pub const CPX_ADDR: u32 = 0x0002_8000;
/// SPX record address as carried in the image; the top byte is dropped on
/// the device.
pub const SPX_RECORD_ADDR: u32 = 0x8004_0000;
pub const SPX_DEVICE_ADDR: u32 = 0x0004_0000;

pub fn loader_data() -> Vec<u8> {
    vec![0x10, 0x20]
}

pub fn cpx_data() -> Vec<u8> {
    (0..16).collect()
}

pub fn spx_data() -> Vec<u8> {
    vec![0xbb; 4]
}

/// A patch image with one record per segment.
pub fn sample_image() -> Vec<u8> {
    PatchBuilder::new()
        .version(*b"05A19")
        .record(SegmentKind::Loader, LOADER_ADDR, &loader_data())
        .record(SegmentKind::Cpx, CPX_ADDR, &cpx_data())
        .record(SegmentKind::Spx, SPX_RECORD_ADDR, &spx_data())
        .build()
}

/// Hands out one in-memory image for any requested name.
pub struct ImageSource(pub Vec<u8>);

impl FirmwareSource for ImageSource {
    fn fetch(&mut self, _name: &str) -> Option<Vec<u8>> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read(u16),
    Write(u16, u8),
}

/// Records every register access on its way to the wrapped transport.
pub struct Recording<T: RegisterTransport> {
    pub inner: T,
    pub ops: Vec<BusOp>,
}

impl<T: RegisterTransport> Recording<T> {
    pub fn new(inner: T) -> Self {
        Recording {
            inner,
            ops: Vec::new(),
        }
    }

    /// Values written to `reg`, in order.
    pub fn writes_to(&self, reg: u16) -> Vec<u8> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BusOp::Write(r, v) if *r == reg => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Number of reads of `reg`.
    pub fn reads_of(&self, reg: u16) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, BusOp::Read(r) if *r == reg))
            .count()
    }
}

impl<T: RegisterTransport> RegisterTransport for Recording<T> {
    fn read_register(&mut self, reg: u16) -> Result<u8, TransportError> {
        self.ops.push(BusOp::Read(reg));
        self.inner.read_register(reg)
    }

    fn write_register(&mut self, reg: u16, value: u8) -> Result<(), TransportError> {
        self.ops.push(BusOp::Write(reg, value));
        self.inner.write_register(reg, value)
    }

    fn set_cache_bypass(&mut self, bypass: bool) {
        self.inner.set_cache_bypass(bypass);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTarget {
    ReadOf(u16),
    WriteTo(u16),
}

/// Fails accesses matching `target` with a fixed error. The first
/// `skip_matches` matching accesses go through; after that every match
/// fails until `failures_left` runs out.
pub struct FaultyBus<T: RegisterTransport> {
    pub inner: T,
    pub target: FaultTarget,
    pub error: TransportError,
    pub skip_matches: usize,
    pub failures_left: usize,
}

impl<T: RegisterTransport> FaultyBus<T> {
    pub fn new(inner: T, target: FaultTarget, error: TransportError) -> Self {
        FaultyBus {
            inner,
            target,
            error,
            skip_matches: 0,
            failures_left: usize::MAX,
        }
    }

    fn fault(&mut self) -> Result<(), TransportError> {
        if self.skip_matches > 0 {
            self.skip_matches -= 1;
            return Ok(());
        }
        if self.failures_left == 0 {
            return Ok(());
        }
        self.failures_left -= 1;
        Err(self.error)
    }
}

impl<T: RegisterTransport> RegisterTransport for FaultyBus<T> {
    fn read_register(&mut self, reg: u16) -> Result<u8, TransportError> {
        if self.target == FaultTarget::ReadOf(reg) {
            self.fault()?;
        }
        self.inner.read_register(reg)
    }

    fn write_register(&mut self, reg: u16, value: u8) -> Result<(), TransportError> {
        if self.target == FaultTarget::WriteTo(reg) {
            self.fault()?;
        }
        self.inner.write_register(reg, value)
    }

    fn set_cache_bypass(&mut self, bypass: bool) {
        self.inner.set_cache_bypass(bypass);
    }
}

#[test]
fn test_recording_captures_traffic() {
    let mut bus = Recording::new(CodecModel::new());
    bus.write_register(0x1019, 0x00).unwrap();
    bus.read_register(0x1005).unwrap();
    assert_eq!(bus.ops, vec![BusOp::Write(0x1019, 0x00), BusOp::Read(0x1005)]);
    assert_eq!(bus.writes_to(0x1019), vec![0x00]);
    assert_eq!(bus.reads_of(0x1005), 1);
}

#[test]
fn test_faulty_bus_fires_where_aimed() {
    let mut bus = FaultyBus::new(
        CodecModel::new(),
        FaultTarget::WriteTo(0x0400),
        TransportError::Nack,
    );
    bus.skip_matches = 1;

    assert!(bus.write_register(0x1019, 0x00).is_ok(), "not the target");
    assert!(bus.write_register(0x0400, 0x81).is_ok(), "skipped once");
    assert_eq!(bus.write_register(0x0400, 0x81), Err(TransportError::Nack));
    assert!(bus.read_register(0x0400).is_ok(), "reads are not the target");
}
