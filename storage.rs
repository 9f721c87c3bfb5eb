//! Append-only CSV log on removable storage.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::structs::SampleRecord;
use crate::{Error, Result};

/// Destination of flushed sample batches.
pub trait StorageSink {
    /// Persist `records` in order, all or nothing from the caller's view.
    ///
    /// Returns [`Error::StorageUnavailable`] when no medium is mounted and
    /// [`Error::Storage`] when the write itself failed.
    fn write_batch(&mut self, records: &[SampleRecord]) -> Result<()>;
}

/// Log file `<root>/<session>/<file>` on the SD card.
///
/// `root` is the mount point. Its presence is checked on every flush, so a
/// card that was missing at startup starts receiving data once mounted.
pub struct SessionStorage {
    root: PathBuf,
    session_dir: PathBuf,
    file: PathBuf,
    // formatted batch, reused between flushes
    lines: String,
}

impl SessionStorage {
    /// Create the session directory.
    ///
    /// An existing directory is reused. A missing mount point is not an
    /// error: the storage starts out unavailable. Any other failure to
    /// create the directory is.
    pub fn open<P: AsRef<Path>>(root: P, session: &str, file: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let session_dir = root.join(session);
        let file = session_dir.join(file);
        let mut storage = Self {
            root,
            session_dir,
            file,
            lines: String::new(),
        };

        if storage.is_mounted() {
            storage.create_session()?;
            info!("Logging to {}", storage.file.display());
        } else {
            warn!(
                "Storage {} is not mounted, samples will only be buffered",
                storage.root.display()
            );
        }
        Ok(storage)
    }

    pub fn is_mounted(&self) -> bool {
        self.root.is_dir()
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    fn create_session(&self) -> Result<()> {
        match fs::create_dir(&self.session_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::Storage(e)),
        }
    }
}

impl StorageSink for SessionStorage {
    fn write_batch(&mut self, records: &[SampleRecord]) -> Result<()> {
        if !self.is_mounted() {
            return Err(Error::StorageUnavailable);
        }
        self.create_session()?;

        self.lines.clear();
        for record in records {
            // writing into a String cannot fail
            let _ = writeln!(self.lines, "{}", record);
        }

        // the handle is closed when it goes out of scope, on error too
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)
            .map_err(Error::Storage)?;
        append_or_rollback(&file, &mut &file, self.lines.as_bytes()).map_err(Error::Storage)?;

        debug!("Wrote {} records to {}", records.len(), self.file.display());
        Ok(())
    }
}

/// Append `bytes` to `file` through `out`.
///
/// If the write fails partway the file is cut back to its previous length,
/// so a retried batch is never stored twice.
fn append_or_rollback<W: Write>(file: &File, out: &mut W, bytes: &[u8]) -> io::Result<()> {
    let committed = file.metadata()?.len();
    if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
        if let Err(truncate) = file.set_len(committed) {
            warn!("Could not drop partial batch: {}", truncate);
        }
        return Err(e);
    }
    Ok(())
}
