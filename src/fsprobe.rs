// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Filesystem capacity probing for the keep-free cap and default spool sizing

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub trait FreeSpaceProbe: Send + Sync {
    fn probe(&self, path: &Path) -> io::Result<FsUsage>;
}

/// statvfs(3) based probe
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl FreeSpaceProbe for StatvfsProbe {
    fn probe(&self, path: &Path) -> io::Result<FsUsage> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        let block_size = stat.f_frsize as u64;
        Ok(FsUsage {
            total_bytes: stat.f_blocks as u64 * block_size,
            available_bytes: stat.f_bavail as u64 * block_size,
        })
    }
}

/// Probe returning configurable values, used in tests and simulations
#[derive(Debug)]
pub struct FixedProbe {
    total: AtomicU64,
    available: AtomicU64,
}

impl FixedProbe {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            total: AtomicU64::new(total_bytes),
            available: AtomicU64::new(available_bytes),
        }
    }

    pub fn set_available(&self, available_bytes: u64) {
        self.available.store(available_bytes, Ordering::SeqCst);
    }
}

impl FreeSpaceProbe for FixedProbe {
    fn probe(&self, _path: &Path) -> io::Result<FsUsage> {
        Ok(FsUsage {
            total_bytes: self.total.load(Ordering::SeqCst),
            available_bytes: self.available.load(Ordering::SeqCst),
        })
    }
}

/// `min(max(1 GiB, 5% of filesystem), 25 GiB)`
pub fn default_max_spool_bytes(filesystem_total: u64) -> u64 {
    (filesystem_total / 20).max(GIB).min(25 * GIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_spool_bytes_bounds() {
        assert_eq!(default_max_spool_bytes(4 * GIB), GIB);
        assert_eq!(default_max_spool_bytes(100 * GIB), 5 * GIB);
        assert_eq!(default_max_spool_bytes(2000 * GIB), 25 * GIB);
    }

    #[test]
    fn test_statvfs_probe_on_tempdir() {
        let dir = tempfile::TempDir::new().unwrap();
        let usage = StatvfsProbe.probe(dir.path()).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.available_bytes <= usage.total_bytes);
    }
}
