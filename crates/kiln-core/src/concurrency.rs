use crate::CoreError;
use fs2::FileExt;
use kiln_store::AssemblyLayout;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Exclusive lock on an assembly home, held for the duration of one run.
///
/// The lock file records the assembly id and pid of the holder so that a
/// second run against the same home can say who it is waiting on.
pub struct AssemblyLock {
    file: File,
    home: PathBuf,
}

impl AssemblyLock {
    /// Take the home's lock for `assembly_id`. Never blocks: a held lock is
    /// [`CoreError::Locked`] naming the current holder.
    pub fn acquire(layout: &AssemblyLayout, assembly_id: &str) -> Result<Self, CoreError> {
        let path = layout.lock_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            let mut holder = String::new();
            // Unreadable on platforms with mandatory locks.
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim();
            return Err(CoreError::Locked {
                home: layout.home().display().to_string(),
                holder: if holder.is_empty() {
                    "another process".to_owned()
                } else {
                    holder.to_owned()
                },
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "assembly {assembly_id} (pid {})", std::process::id())?;
        file.flush()?;
        debug!("locked {}", path.display());

        Ok(Self {
            file,
            home: layout.home().to_path_buf(),
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl Drop for AssemblyLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Ctrl-C once requests a stop at the next stage boundary; twice exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current stage...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Fail with [`CoreError::Interrupted`] if a shutdown was requested.
pub(crate) fn check_interrupted() -> Result<(), CoreError> {
    if shutdown_requested() {
        return Err(CoreError::Interrupted);
    }
    Ok(())
}
