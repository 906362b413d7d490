#![forbid(unsafe_code)]
//! Byte-addressed non-volatile device abstraction.
//!
//! Provides the `ByteDevice` trait the block manager drives (open/close
//! lifecycle plus aligned `pread`/`pwrite`-style I/O with `&Cx` capability
//! context for cooperative cancellation) and `FileByteDevice`, a file or
//! raw-device implementation over `std::os::unix::fs::FileExt`.
//!
//! All offsets and lengths handed to a device must be multiples of its
//! logical block size; the manager is responsible for alignment and this
//! layer only debug-asserts it.

use asupersync::Cx;
use rbm_error::{RbmError, Result};
use rbm_types::BlockAddr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

#[inline]
fn cx_checkpoint(cx: &Cx) -> Result<()> {
    cx.checkpoint().map_err(|_| RbmError::Cancelled)
}

const PAGE_ALIGNMENT: usize = 4096;

/// Owned byte buffer whose exposed slice starts at a page boundary.
///
/// This type remains fully safe by keeping the original backing allocation
/// and exposing an aligned subslice.
#[derive(Debug, Clone)]
pub struct AlignedVec {
    storage: Vec<u8>,
    start: usize,
    len: usize,
}

impl AlignedVec {
    /// Allocate a zeroed page-aligned buffer of `size` bytes.
    #[must_use]
    pub fn zeroed(size: usize) -> Self {
        if size == 0 {
            return Self {
                storage: Vec::new(),
                start: 0,
                len: 0,
            };
        }

        let storage = vec![0_u8; size + PAGE_ALIGNMENT - 1];
        let base = storage.as_ptr() as usize;
        let misalignment = base & (PAGE_ALIGNMENT - 1);
        let start = if misalignment == 0 {
            0
        } else {
            PAGE_ALIGNMENT - misalignment
        };
        debug_assert!(start + size <= storage.len());
        trace!(
            target: "rbm::device",
            event = "buffer_alloc",
            size = size
        );
        Self {
            storage,
            start,
            len: size,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let start = self.start;
        let end = start + self.len;
        &mut self.storage[start..end]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for AlignedVec {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for AlignedVec {}

/// Open mode for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

/// Byte-addressed non-volatile device (pread/pwrite semantics).
///
/// The manager serializes all calls; implementations do not need internal
/// ordering beyond completing each call before returning.
pub trait ByteDevice: Send + Sync {
    /// Open the device at `path`.
    fn open(&mut self, cx: &Cx, path: &Path, mode: OpenMode) -> Result<()>;

    /// Close the device. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Total length in bytes; 0 when closed.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes starting at `addr`.
    fn read_exact_at(&self, cx: &Cx, addr: BlockAddr, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` starting at `addr`.
    ///
    /// Writes are durable when the call returns.
    fn write_all_at(&self, cx: &Cx, addr: BlockAddr, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self, cx: &Cx) -> Result<()>;
}

/// File-backed byte device using Linux `pread`/`pwrite` style I/O.
///
/// `std::os::unix::fs::FileExt` is thread-safe and does not require a
/// shared seek position.
#[derive(Debug)]
pub struct FileByteDevice {
    file: Option<Arc<File>>,
    len: u64,
    writable: bool,
    logical_block_size: u32,
}

impl Default for FileByteDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FileByteDevice {
    /// A closed device with the default 512-byte logical block size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            len: 0,
            writable: false,
            logical_block_size: 512,
        }
    }

    /// A closed device with an explicit logical block size.
    #[must_use]
    pub fn with_logical_block_size(logical_block_size: u32) -> Self {
        Self {
            logical_block_size,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file(&self) -> Result<&Arc<File>> {
        self.file.as_ref().ok_or_else(|| {
            RbmError::Io(io::Error::new(io::ErrorKind::NotConnected, "device not open"))
        })
    }

    fn check_bounds(&self, addr: BlockAddr, len: usize) -> Result<()> {
        let len = u64::try_from(len)
            .map_err(|_| RbmError::Format("I/O length overflows u64".to_owned()))?;
        let end = addr
            .checked_add(len)
            .ok_or_else(|| RbmError::Format("I/O range overflows u64".to_owned()))?;
        if end.0 > self.len {
            return Err(RbmError::OutOfRange {
                addr: addr.0,
                limit: self.len,
            });
        }
        debug_assert!(addr.0 % u64::from(self.logical_block_size) == 0);
        debug_assert!(len % u64::from(self.logical_block_size) == 0);
        Ok(())
    }
}

impl ByteDevice for FileByteDevice {
    fn open(&mut self, cx: &Cx, path: &Path, mode: OpenMode) -> Result<()> {
        cx_checkpoint(cx)?;
        let (file, writable) = match mode {
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map(|file| (file, true)),
            OpenMode::ReadOnly => OpenOptions::new()
                .read(true)
                .open(path)
                .map(|file| (file, false)),
        }
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RbmError::NotFound(path.display().to_string()),
            _ => RbmError::Io(err),
        })?;
        let len = file.metadata()?.len();
        trace!(
            target: "rbm::device",
            event = "open",
            path = %path.display(),
            len_bytes = len,
            writable = writable
        );
        self.file = Some(Arc::new(file));
        self.len = len;
        self.writable = writable;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            trace!(target: "rbm::device", event = "close");
        }
        self.len = 0;
        self.writable = false;
        Ok(())
    }

    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, cx: &Cx, addr: BlockAddr, buf: &mut [u8]) -> Result<()> {
        cx_checkpoint(cx)?;
        self.check_bounds(addr, buf.len())?;
        self.file()?.read_exact_at(buf, addr.0)?;
        cx_checkpoint(cx)?;
        Ok(())
    }

    fn write_all_at(&self, cx: &Cx, addr: BlockAddr, buf: &[u8]) -> Result<()> {
        cx_checkpoint(cx)?;
        if !self.writable {
            return Err(RbmError::PermissionDenied);
        }
        self.check_bounds(addr, buf.len())?;
        self.file()?.write_all_at(buf, addr.0)?;
        cx_checkpoint(cx)?;
        Ok(())
    }

    fn sync(&self, cx: &Cx) -> Result<()> {
        cx_checkpoint(cx)?;
        self.file()?.sync_all()?;
        cx_checkpoint(cx)?;
        Ok(())
    }
}
