//! Process-wide pool of reusable send buffers.
//!
//! The framed writer assembles each frame (or batch) into one contiguous
//! buffer before the single socket write. Those buffers come from a
//! bounded LIFO free list with a soft cap: buffers that grew past the
//! retention limit are dropped instead of returned, so a single huge
//! payload does not pin memory forever.
//!
//! [`PooledBuf`] returns its storage in `Drop`, so a send future that is
//! cancelled at an await point still recycles its buffer. A buffer is
//! never handed to two users at once.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};

/// Soft cap on the free-list length.
const MAX_POOLED_BUFFERS: usize = 16;

/// Buffers that grew beyond this capacity are not retained.
const MAX_RETAINED_CAPACITY: usize = 256 * 1024;

/// Initial capacity for freshly allocated buffers.
const INITIAL_CAPACITY: usize = 4 * 1024;

static POOL: OnceLock<Mutex<Vec<Vec<u8>>>> = OnceLock::new();

fn pool() -> &'static Mutex<Vec<Vec<u8>>> {
    POOL.get_or_init(|| Mutex::new(Vec::new()))
}

/// An empty, reusable byte buffer checked out of the process-wide pool.
///
/// Dereferences to `Vec<u8>`; dropping it returns the storage.
pub struct PooledBuf {
    buf: Vec<u8>,
}

impl PooledBuf {
    /// Check a buffer out of the pool, allocating if the pool is empty.
    /// The returned buffer is always empty.
    pub fn acquire() -> Self {
        let buf = pool()
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY));
        debug_assert!(buf.is_empty());
        Self { buf }
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if self.buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let mut free = pool().lock().expect("buffer pool poisoned");
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(buf);
        }
    }
}
