//! Directory copy with byte accounting and cancellation.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::common::files::dir_size;
use crate::error::{IoContext, Result, ServicingError};
use crate::events::{ByteCounter, CancelFlag, EventSink};

/// Copies directory trees, adding every copied byte to a shared counter.
pub struct DirCopier<'a> {
    counter: &'a ByteCounter,
    cancel: &'a CancelFlag,
    sink: &'a dyn EventSink,
}

impl<'a> DirCopier<'a> {
    pub fn new(counter: &'a ByteCounter, cancel: &'a CancelFlag, sink: &'a dyn EventSink) -> Self {
        Self {
            counter,
            cancel,
            sink,
        }
    }

    /// Copy everything under `src` into `dst`. Returns the bytes copied by
    /// this call.
    ///
    /// Cancellation is checked before each file; a cancelled copy leaves the
    /// files copied so far in place.
    pub fn copy_tree(&self, src: &Path, dst: &Path, label: &str) -> Result<u64> {
        if !src.is_dir() {
            return Err(ServicingError::missing(format!("directory {}", src.display())));
        }

        let total = dir_size(src);
        let mut copied = 0u64;
        self.sink.notify_detailed_progress(0, total, label);

        for entry in WalkDir::new(src) {
            if self.cancel.is_cancelled() {
                return Err(ServicingError::Cancelled);
            }
            let entry = entry.map_err(|e| {
                let context = format!("Walking {}", src.display());
                match e.into_io_error() {
                    Some(io) => ServicingError::io(context, io),
                    None => ServicingError::io(context, std::io::Error::other("filesystem loop")),
                }
            })?;

            let Ok(rel) = entry.path().strip_prefix(src) else {
                continue;
            };
            let target = dst.join(rel);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).io_context(|| format!("Creating {}", target.display()))?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).io_context(|| format!("Creating {}", parent.display()))?;
                }
                let bytes = fs::copy(entry.path(), &target).io_context(|| {
                    format!("Copying {} to {}", entry.path().display(), target.display())
                })?;
                copied += bytes;
                self.counter.add(bytes);
                self.sink.notify_detailed_progress(copied.min(total), total, label);
            }
        }

        self.sink.notify_detailed_progress(total, total, label);
        Ok(copied)
    }
}
