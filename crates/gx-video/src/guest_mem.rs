//! Guest RAM as the texture cache sees it.
//!
//! The console addresses texture data with physical addresses into main
//! memory. The emulator core owns the actual allocation; this wrapper only
//! adds the address masking and bounds-checked slicing the video layer
//! needs.

use crate::error::VideoError;

/// Physical address space size of the emulated main memory (24 MiB).
pub const MAIN_MEMORY_SIZE: u32 = 0x0180_0000;

/// Mask applied to guest pointers before indexing RAM. The console mirrors
/// main memory across several address windows.
pub const ADDRESS_MASK: u32 = 0x01ff_ffff;

pub struct GuestMemory {
    ram: Vec<u8>,
}

impl GuestMemory {
    pub fn new() -> Self {
        Self {
            ram: vec![0; MAIN_MEMORY_SIZE as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.ram.len() as u32
    }

    fn resolve(&self, address: u32, len: u32) -> Result<usize, VideoError> {
        let base = (address & ADDRESS_MASK) as usize;
        let end = base.checked_add(len as usize);
        match end {
            Some(end) if end <= self.ram.len() => Ok(base),
            _ => Err(VideoError::GuestMemoryRange { address, len }),
        }
    }

    pub fn slice(&self, address: u32, len: u32) -> Result<&[u8], VideoError> {
        let base = self.resolve(address, len)?;
        Ok(&self.ram[base..base + len as usize])
    }

    pub fn slice_mut(&mut self, address: u32, len: u32) -> Result<&mut [u8], VideoError> {
        let base = self.resolve(address, len)?;
        Ok(&mut self.ram[base..base + len as usize])
    }

    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), VideoError> {
        let dst = self.slice_mut(address, data.len() as u32)?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

impl Default for GuestMemory {
    fn default() -> Self {
        Self::new()
    }
}
