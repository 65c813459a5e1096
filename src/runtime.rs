//! I/O worker pool
//!
//! Servers and clients run on whatever tokio runtime they are created in.
//! `IoPool` is for callers that live on plain threads: it owns a
//! multi-threaded runtime with a fixed number of workers.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::Result;

/// Fixed-size pool of I/O worker threads
#[derive(Debug)]
pub struct IoPool {
    runtime: Runtime,
}

impl IoPool {
    /// Start `threads` workers (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("streamcast-io")
            .enable_all()
            .build()?;

        Ok(Self { runtime })
    }

    /// Handle for spawning onto the pool
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Run a future to completion on the pool from a plain thread
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on() {
        let pool = IoPool::new(2).unwrap();
        let value = pool.block_on(async { tokio::task::yield_now().await; 7 });
        assert_eq!(value, 7);
    }

    #[test]
    fn test_zero_threads_clamped() {
        let pool = IoPool::new(0).unwrap();
        let handle = pool.handle();
        let result = pool.block_on(async move { handle.spawn(async { 1 + 1 }).await });
        assert_eq!(result.unwrap(), 2);
    }
}
