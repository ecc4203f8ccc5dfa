//! Read-only memory mapping of persisted files.
//!
//! Mapping is a platform capability. Targets without it (wasm, wasi) get an
//! explicit [`TsmemError::Unsupported`] instead of a partial implementation.

use crate::{Result, TsmemError};
use std::fs::File;
use std::path::Path;

/// Maximum map size for different architectures
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub const MAX_MAP_SIZE: usize = usize::MAX;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const MAX_MAP_SIZE: usize = 0x7FFFFFFF; // 2GB on 32-bit and unknown architectures

/// A read-only, shared view of a file region.
pub struct MappedRegion {
    #[cfg(not(target_family = "wasm"))]
    mmap: memmap2::Mmap,
}

impl MappedRegion {
    /// Returns the mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        #[cfg(not(target_family = "wasm"))]
        {
            &self.mmap[..]
        }
        #[cfg(target_family = "wasm")]
        {
            &[]
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// Maps the first `length` bytes of `file` read-only and shared.
#[cfg(not(target_family = "wasm"))]
pub fn map_read_only(file: &File, length: usize) -> Result<MappedRegion> {
    if length == 0 {
        return Err(TsmemError::MemoryMap {
            details: "cannot map an empty region".to_string(),
        });
    }
    // Only enforce the ceiling where MAX_MAP_SIZE is not unbounded.
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    if length > MAX_MAP_SIZE {
        return Err(TsmemError::MemoryMap {
            details: format!(
                "map size {} exceeds maximum {} for this architecture",
                length, MAX_MAP_SIZE
            ),
        });
    }

    // SAFETY: the mapping is read-only; callers must not truncate the file
    // while the region is alive.
    let mmap = unsafe { memmap2::MmapOptions::new().len(length).map(file) }.map_err(|e| {
        TsmemError::MemoryMap {
            details: e.to_string(),
        }
    })?;

    Ok(MappedRegion { mmap })
}

#[cfg(target_family = "wasm")]
pub fn map_read_only(_file: &File, _length: usize) -> Result<MappedRegion> {
    Err(TsmemError::Unsupported {
        operation: "memory mapping".to_string(),
    })
}

/// Opens `path` and maps the whole file.
pub fn map_file(path: impl AsRef<Path>) -> Result<MappedRegion> {
    let file = File::open(path.as_ref())?;
    let length = usize::try_from(file.metadata()?.len()).map_err(|_| TsmemError::MemoryMap {
        details: format!("{:?} is too large to map", path.as_ref()),
    })?;
    map_read_only(&file, length)
}

/// Reports whether this target can map files at all.
pub const fn is_supported() -> bool {
    cfg!(not(target_family = "wasm"))
}
