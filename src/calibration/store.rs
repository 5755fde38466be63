/// Non-volatile calibration store
///
/// Mirrors an EEPROM emulation: writes land in a RAM buffer between
/// `begin` and `commit`, and only `commit` makes them durable.
use log::{debug, info};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::RigError;

/// Bytes reserved for calibration constants
pub const EEPROM_SIZE: usize = 32;
/// pH neutral and acid voltages (two f32)
pub const PH_ADDR: usize = 0x00;
/// EC low and high K values (two f32)
pub const EC_ADDR: usize = 0x0A;
/// Length of the EC calibration block
pub const EC_RANGE_LEN: usize = 8;
/// Erased byte value, marks an uncalibrated slot
pub const ERASED: u8 = 0xFF;

pub trait CalibrationStore {
    /// Open the store with room for `size` bytes
    fn begin(&mut self, size: usize) -> Result<(), RigError>;

    /// Read a byte; addresses outside the store read as erased
    fn read(&self, addr: usize) -> u8;

    /// Stage a byte; addresses outside the store are ignored
    fn write(&mut self, addr: usize, value: u8);

    /// Persist staged writes
    fn commit(&mut self) -> Result<(), RigError>;
}

/// Read a little-endian f32, or `None` when all four bytes are erased
pub fn read_f32<S: CalibrationStore + ?Sized>(store: &S, addr: usize) -> Option<f32> {
    let bytes = [
        store.read(addr),
        store.read(addr + 1),
        store.read(addr + 2),
        store.read(addr + 3),
    ];
    if bytes.iter().all(|&b| b == ERASED) {
        None
    } else {
        Some(f32::from_le_bytes(bytes))
    }
}

pub fn write_f32<S: CalibrationStore + ?Sized>(store: &mut S, addr: usize, value: f32) {
    for (offset, byte) in value.to_le_bytes().into_iter().enumerate() {
        store.write(addr + offset, byte);
    }
}

/// Erase `len` bytes from `base`, commit, and return what reads back
pub fn reset_range<S: CalibrationStore + ?Sized>(
    store: &mut S,
    base: usize,
    len: usize,
) -> Result<Vec<(usize, u8)>, RigError> {
    for addr in base..base + len {
        store.write(addr, ERASED);
    }
    store.commit()?;
    Ok((base..base + len).map(|addr| (addr, store.read(addr))).collect())
}

/// Calibration store backed by a small file on disk
#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    buffer: Vec<u8>,
}

impl FileEeprom {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            buffer: Vec::new(),
        }
    }
}

impl CalibrationStore for FileEeprom {
    fn begin(&mut self, size: usize) -> Result<(), RigError> {
        let mut buffer = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No calibration file at {}, starting erased",
                    self.path.display()
                );
                Vec::new()
            }
            Err(e) => {
                return Err(RigError::StorageInitFailure(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        buffer.resize(size, ERASED);
        debug!("Calibration store opened with {} bytes", size);
        self.buffer = buffer;
        Ok(())
    }

    fn read(&self, addr: usize) -> u8 {
        self.buffer.get(addr).copied().unwrap_or(ERASED)
    }

    fn write(&mut self, addr: usize, value: u8) {
        if let Some(slot) = self.buffer.get_mut(addr) {
            *slot = value;
        }
    }

    fn commit(&mut self) -> Result<(), RigError> {
        if self.buffer.is_empty() {
            return Err(RigError::StorageInitFailure(
                "commit before begin".to_string(),
            ));
        }
        fs::write(&self.path, &self.buffer).map_err(|e| {
            RigError::StorageInitFailure(format!("cannot write {}: {}", self.path.display(), e))
        })
    }
}
