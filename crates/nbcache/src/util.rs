use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` atomically: write to a unique temp file in the
/// same directory, fsync, then rename over the destination. Intermediate
/// directories are created.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written {
        remove_tmp_best_effort(&tmp_path);
        return Err(err);
    }

    match fs::rename(&tmp_path, path) {
        Ok(()) => {
            sync_dir_best_effort(parent);
            Ok(())
        }
        Err(err) if cfg!(windows) && path.exists() => {
            // Windows rename does not overwrite; retry once after removing
            // the destination.
            let _ = fs::remove_file(path);
            match fs::rename(&tmp_path, path) {
                Ok(()) => {
                    sync_dir_best_effort(parent);
                    Ok(())
                }
                Err(_) => {
                    remove_tmp_best_effort(&tmp_path);
                    Err(err)
                }
            }
        }
        Err(err) => {
            remove_tmp_best_effort(&tmp_path);
            Err(err)
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn remove_tmp_best_effort(tmp_path: &Path) {
    if let Err(err) = fs::remove_file(tmp_path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target = "nbcache.store",
                path = %tmp_path.display(),
                error = %err,
                "failed to remove temporary file after write failure"
            );
        }
    }
}

/// Fsync the directory entry so a rename survives power loss. Best effort.
fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(err) = fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target = "nbcache.store",
                    dir = %dir.display(),
                    error = %err,
                    "failed to sync directory after rename"
                );
            }
        }
    }

    #[cfg(not(unix))]
    let _ = dir;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("a").join("b").join("file.txt");

        atomic_write(&dest, b"first").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"first");

        atomic_write(&dest, b"second").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"second");

        // No temp files left behind.
        let names: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["file.txt".to_string()]);
    }
}
