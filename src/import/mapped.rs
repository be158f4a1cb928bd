/*!
 * Scoped memory mappings
 *
 * Thin wrappers so every mapping carries its path in errors and is dropped
 * (unmapped) on all exit paths. Zero-length files must be guarded by the
 * caller; mapping them is a platform-dependent error.
 */

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::error::{ImportError, Result};

/// Map a file read-only.
pub fn map_ro(path: &Path) -> Result<Mmap> {
    let file = OpenOptions::new().read(true).open(path).map_err(|e| {
        ImportError::MmapFailed {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    // Safety: the importer owns its scratch and shadow files; nothing else
    // truncates them while mapped.
    unsafe { Mmap::map(&file) }.map_err(|e| ImportError::MmapFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Map a file read-write.
pub fn map_rw(path: &Path) -> Result<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| ImportError::MmapFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    // Safety: see map_ro; single-writer discipline per file is enforced by
    // the phase structure.
    unsafe { MmapMut::map_mut(&file) }.map_err(|e| ImportError::MmapFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn maps_and_rewrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.bin");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        {
            let mut map = map_rw(&path).unwrap();
            map[0] = 9;
            map.flush().unwrap();
        }
        let map = map_ro(&path).unwrap();
        assert_eq!(&map[..], &[9, 2, 3, 4]);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let err = map_ro(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ImportError::MmapFailed { .. }));
    }
}
