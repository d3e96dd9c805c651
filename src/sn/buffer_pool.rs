//! A small pool of fixed-size chunk buffers reused by `READ`/checkpoint-view
//! streaming instead of allocating a fresh `Vec<u8>` per chunk. Generalizes
//! the teacher's `allocator::{Buffer, Allocator}` channel-backed free list:
//! here the pool only needs "take a free one, give it back", so a
//! `crossbeam_queue::ArrayQueue` stands in for the teacher's `mpsc` channel.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::proto::frame::MAX_PAYLOAD;

pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(vec![0u8; MAX_PAYLOAD]);
        }
        Arc::new(Self { free })
    }

    /// Takes a buffer from the pool, allocating a fresh one if the pool is
    /// momentarily exhausted (bounded pools trade a rare extra allocation
    /// for never blocking a reader).
    pub fn take(&self) -> Vec<u8> {
        self.free.pop().unwrap_or_else(|| vec![0u8; MAX_PAYLOAD])
    }

    pub fn give_back(&self, mut buf: Vec<u8>) {
        buf.clear();
        buf.resize(MAX_PAYLOAD, 0);
        let _ = self.free.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_and_give_back_reuses_capacity() {
        let pool = BufferPool::new(2);
        let a = pool.take();
        let b = pool.take();
        assert_eq!(a.len(), MAX_PAYLOAD);
        pool.give_back(a);
        pool.give_back(b);
        let c = pool.take();
        assert_eq!(c.len(), MAX_PAYLOAD);
    }
}
