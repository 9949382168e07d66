//! util — small helpers shared by segment/heap/pool.

use std::fs::File;
use std::path::Path;

/// Best-effort fsync of a file's parent directory, so a create/rename is
/// durable even if the platform doesn't implicitly flush directory entries.
#[cfg(unix)]
pub fn fsync_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn fsync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsync_parent_dir_on_existing_file_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        fsync_parent_dir(&path).unwrap();
    }
}
