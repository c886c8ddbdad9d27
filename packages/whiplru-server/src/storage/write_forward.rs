//! The write-forward log (C5): a crash-safe queue of "this id still needs to
//! be pushed upstream" markers, backed by a fixed-slot memory-mapped file so
//! a crash between a local write and its upstream forward is recoverable on
//! the next startup instead of silently losing the write.
//!
//! Layout: an 8-byte magic header (`WHIPLRU1`) followed by `slot_count`
//! fixed 17-byte slots, each one status byte plus a 16-byte UUID. The slot
//! count is fixed at creation time; it is not a growable queue.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use memmap2::MmapMut;
use whiplru_core::AssetId;

const MAGIC: &[u8; 8] = b"WHIPLRU1";
const HEADER_LEN: usize = 8;
const SLOT_LEN: usize = 17;

const STATUS_EMPTY: u8 = 0;
const STATUS_PENDING: u8 = 1;

/// Error surfaced by the write-forward log.
#[derive(Debug, thiserror::Error)]
pub enum WriteForwardError {
    /// The file exists but its header doesn't match the expected magic --
    /// it belongs to something else, or was truncated into the header
    /// itself.
    #[error("write-forward log has a bad magic header")]
    BadMagic,
    /// The file exists, has a correct magic, but its length isn't a whole
    /// number of slots -- a partial write during a previous crash.
    #[error("write-forward log file is truncated")]
    Truncated,
    /// Every slot is currently pending; the write cache is, in the sense of
    /// this log, full.
    #[error("write-forward log has no free slots")]
    Full,
    /// Any other filesystem or mmap failure.
    #[error("write-forward log io error: {0}")]
    Io(String),
}

/// A fixed-slot, memory-mapped, crash-recoverable pending-write queue.
pub struct WriteForwardLog {
    mmap: Mutex<MmapMut>,
    slot_count: usize,
    status_mirror: Vec<AtomicU8>,
}

impl WriteForwardLog {
    /// Opens the log at `path`, creating a fresh one with `slot_count` slots
    /// if it doesn't exist. An existing file's own slot count (derived from
    /// its length) always wins over `slot_count`; the parameter only applies
    /// to first creation.
    pub fn open(path: &Path, slot_count: usize) -> Result<Self, WriteForwardError> {
        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| WriteForwardError::Io(e.to_string()))?;

        if !existed {
            let total_len = (HEADER_LEN + slot_count * SLOT_LEN) as u64;
            file.set_len(total_len)
                .map_err(|e| WriteForwardError::Io(e.to_string()))?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| WriteForwardError::Io(e.to_string()))?;

        if !existed {
            mmap[..HEADER_LEN].copy_from_slice(MAGIC);
            mmap.flush().map_err(|e| WriteForwardError::Io(e.to_string()))?;
        }

        if mmap.len() < HEADER_LEN {
            return Err(WriteForwardError::Truncated);
        }
        if &mmap[..HEADER_LEN] != MAGIC {
            return Err(WriteForwardError::BadMagic);
        }
        let body_len = mmap.len() - HEADER_LEN;
        if body_len % SLOT_LEN != 0 {
            return Err(WriteForwardError::Truncated);
        }
        let actual_slot_count = body_len / SLOT_LEN;

        let mut status_mirror = Vec::with_capacity(actual_slot_count);
        for i in 0..actual_slot_count {
            let offset = HEADER_LEN + i * SLOT_LEN;
            status_mirror.push(AtomicU8::new(mmap[offset]));
        }

        Ok(Self {
            mmap: Mutex::new(mmap),
            slot_count: actual_slot_count,
            status_mirror,
        })
    }

    /// Total number of slots this log was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    fn slot_offset(index: usize) -> usize {
        HEADER_LEN + index * SLOT_LEN
    }

    /// Claims a free slot for `id`, persisting it before returning. Returns
    /// [`WriteForwardError::Full`] if every slot is already pending.
    pub fn allocate_slot(&self, id: AssetId) -> Result<usize, WriteForwardError> {
        for (index, status) in self.status_mirror.iter().enumerate() {
            if status
                .compare_exchange(STATUS_EMPTY, STATUS_PENDING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let mut mmap = self.mmap.lock().expect("write-forward mmap lock poisoned");
                let offset = Self::slot_offset(index);
                mmap[offset] = STATUS_PENDING;
                mmap[offset + 1..offset + 1 + 16].copy_from_slice(id.as_bytes());
                mmap.flush_range(offset, SLOT_LEN)
                    .map_err(|e| WriteForwardError::Io(e.to_string()))?;
                return Ok(index);
            }
        }
        Err(WriteForwardError::Full)
    }

    /// Marks `slot` free again once its write has been durably forwarded.
    pub fn mark_done(&self, slot: usize) -> Result<(), WriteForwardError> {
        self.status_mirror[slot].store(STATUS_EMPTY, Ordering::Release);
        let mut mmap = self.mmap.lock().expect("write-forward mmap lock poisoned");
        let offset = Self::slot_offset(slot);
        mmap[offset] = STATUS_EMPTY;
        mmap.flush_range(offset, 1)
            .map_err(|e| WriteForwardError::Io(e.to_string()))?;
        Ok(())
    }

    /// Scans every slot for ones left pending, used at startup to resume
    /// forwarding writes a previous crash interrupted.
    #[must_use]
    pub fn recover_pending(&self) -> Vec<(usize, AssetId)> {
        let mmap = self.mmap.lock().expect("write-forward mmap lock poisoned");
        let mut pending = Vec::new();
        for (index, status) in self.status_mirror.iter().enumerate() {
            if status.load(Ordering::Acquire) == STATUS_PENDING {
                let offset = Self::slot_offset(index);
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&mmap[offset + 1..offset + 1 + 16]);
                pending.push((index, AssetId(bytes)));
            }
        }
        pending
    }

    /// Number of slots currently pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.status_mirror
            .iter()
            .filter(|s| s.load(Ordering::Acquire) == STATUS_PENDING)
            .count()
    }
}
