use anyhow::{Error, Result};
use nix::libc::getpid;
use std::{
    fs::{remove_file, File},
    io::{Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use sysinfo::System;
use tracing::{debug, warn};

const LOCK_PATH: &str = "/run/rxtune/rxtuned.lock";
const PROCESS_NAME: &str = "rxtuned";

/// Single-instance guard. Holds a PID file for as long as it lives.
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new() -> Result<Self> {
        Self::acquire(Path::new(LOCK_PATH))
    }

    fn acquire(path: &Path) -> Result<Self> {
        Self::check_directory(path)?;
        if path.exists() {
            if Self::is_lock_valid(path)? {
                return Err(Error::msg("rxtuned is already running"));
            }
            debug!("Replacing stale lock {}", path.display());
        }
        Self::create_lock(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn is_lock_valid(path: &Path) -> Result<bool> {
        let mut f = File::open(path)?;
        let mut contents = String::new();
        f.read_to_string(&mut contents)?;
        let Ok(pid) = contents.trim().parse::<usize>() else {
            warn!("Lock file {} does not hold a PID", path.display());
            return Ok(false);
        };

        let sys = System::new_all();
        let pid = sysinfo::Pid::from(pid);
        if let Some(process) = sys.processes().get(&pid) {
            if process
                .name()
                .to_str()
                .unwrap_or_default()
                .contains(PROCESS_NAME)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn create_lock(path: &Path) -> Result<()> {
        let pid = unsafe { getpid() };
        {
            let mut f = File::create(path)?;
            f.write_all(format!("{pid}").as_bytes())?;
        }
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
        Ok(())
    }

    fn check_directory(path: &Path) -> Result<()> {
        match path.parent() {
            Some(dir) if !dir.is_dir() => {
                std::fs::create_dir_all(dir)?;
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Removes the default lock file, for use where the guard itself is
    /// out of reach (signal handlers).
    pub fn remove_lock() {
        let _ = remove_file(LOCK_PATH); // Ignore result
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = remove_file(&self.path);
    }
}
