//! Process-wide pool of fixed-size I/O buffers.
//!
//! Peak memory is bounded by `buffer_count * buffer_size` no matter how
//! large the dataset is: when every buffer is leased out, acquisition
//! blocks until one is returned. A lease owns its buffer exclusively and
//! returns it on drop, so cancellation and error paths cannot leak buffers.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use tracing::trace;

/// Default buffer size: 64 MiB, the working-set unit for analysis chunks
/// and partition segments alike.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug)]
struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    returned: Condvar,
    buffer_size: usize,
    buffer_count: usize,
}

#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

/// Exclusively-owned buffer leased from a [`BufferPool`].
#[derive(Debug)]
pub struct BufferLease {
    // Only `None` transiently inside `drop`.
    data: Option<Vec<u8>>,
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, buffer_count: usize) -> Self {
        assert!(buffer_size > 0 && buffer_count > 0);
        let free = (0..buffer_count).map(|_| vec![0u8; buffer_size]).collect();
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                returned: Condvar::new(),
                buffer_size,
                buffer_count,
            }),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Total buffers in the pool, leased or free.
    pub fn buffer_count(&self) -> usize {
        self.shared.buffer_count
    }

    /// Leases a buffer, blocking until one is free.
    pub fn acquire(&self) -> BufferLease {
        let mut free = self
            .shared
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(data) = free.pop() {
                trace!(remaining = free.len(), "buffer acquired");
                return BufferLease {
                    data: Some(data),
                    shared: Arc::clone(&self.shared),
                };
            }
            free = self
                .shared
                .returned
                .wait(free)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Deref for BufferLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap()
    }
}

impl DerefMut for BufferLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let mut free = self
                .shared
                .free
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            free.push(data);
            self.shared.returned.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lease_returns_on_drop() {
        let pool = BufferPool::new(1024, 1);
        {
            let mut lease = pool.acquire();
            lease[0] = 42;
        }
        // Would deadlock if the drop above had not returned the buffer.
        let lease = pool.acquire();
        assert_eq!(lease.len(), 1024);
    }

    #[test]
    fn exhausted_pool_blocks_until_release() {
        let pool = BufferPool::new(64, 1);
        let lease = pool.acquire();

        let pool2 = pool.clone();
        let waiter = thread::spawn(move || {
            let lease = pool2.acquire();
            lease.len()
        });

        // Give the waiter time to block on the empty pool.
        thread::sleep(Duration::from_millis(50));
        drop(lease);

        assert_eq!(waiter.join().unwrap(), 64);
    }
}
