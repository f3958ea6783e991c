use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::hal::SampleBlock;

/// What the producer does when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the consumer to drain
    Block,
    /// Discard the oldest block to make room
    DropOldest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStatus {
    pub capacity: usize,
    pub available: usize,
    pub produced: u64,
    pub drained: u64,
    pub overflow_count: u64,
    pub policy: BackpressurePolicy,
}

/// Bounded, task-local ring of sample blocks.
///
/// The sampling worker is the only producer. Both ends of the channel live
/// here so drop-oldest can evict from the producer side.
pub struct SampleBuffer {
    tx: Sender<SampleBlock>,
    rx: Receiver<SampleBlock>,
    capacity: usize,
    policy: BackpressurePolicy,
    space_freed: Notify,
    produced: AtomicU64,
    drained: AtomicU64,
    overflows: AtomicU64,
}

impl SampleBuffer {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            policy,
            space_freed: Notify::new(),
            produced: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
        }
    }

    /// Store a block without waiting.
    ///
    /// Under [`BackpressurePolicy::Block`] a full buffer hands the block back.
    pub fn try_push(&self, block: SampleBlock) -> Result<(), SampleBlock> {
        let mut block = block;
        loop {
            match self.tx.try_send(block) {
                Ok(()) => {
                    self.produced.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(TrySendError::Full(rejected)) => match self.policy {
                    BackpressurePolicy::Block => return Err(rejected),
                    BackpressurePolicy::DropOldest => {
                        if self.rx.try_recv().is_ok() {
                            self.overflows.fetch_add(1, Ordering::Relaxed);
                        }
                        block = rejected;
                    }
                },
                // Unreachable while self owns the receiver
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
    }

    /// Store a block, waiting for space under the block policy.
    ///
    /// Returns `false` if `cancel` was raised while waiting; the block is
    /// then discarded.
    pub async fn push(&self, block: SampleBlock, cancel: &AtomicBool, poll: Duration) -> bool {
        let mut block = block;
        loop {
            match self.try_push(block) {
                Ok(()) => return true,
                Err(rejected) => {
                    if cancel.load(Ordering::Acquire) {
                        return false;
                    }
                    block = rejected;
                    tokio::select! {
                        _ = self.space_freed.notified() => {}
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
    }

    /// Remove up to `max_blocks` blocks, oldest first
    pub fn drain(&self, max_blocks: usize) -> Vec<SampleBlock> {
        let blocks: Vec<_> = self.rx.try_iter().take(max_blocks).collect();
        if !blocks.is_empty() {
            self.drained.fetch_add(blocks.len() as u64, Ordering::Relaxed);
            self.space_freed.notify_one();
        }
        blocks
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            capacity: self.capacity,
            available: self.rx.len(),
            produced: self.produced.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            overflow_count: self.overflows.load(Ordering::Relaxed),
            policy: self.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn block(sequence: u64) -> SampleBlock {
        SampleBlock::new(sequence, 1, vec![sequence as f64], 1000.0)
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let buffer = SampleBuffer::new(3, BackpressurePolicy::DropOldest);
        for i in 0..5 {
            buffer.try_push(block(i)).unwrap();
        }

        let status = buffer.status();
        assert_eq!(status.available, 3);
        assert_eq!(status.produced, 5);
        assert_eq!(status.overflow_count, 2);

        let sequences: Vec<_> = buffer.drain(10).iter().map(|b| b.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
    }

    #[test]
    fn test_block_policy_rejects_when_full() {
        let buffer = SampleBuffer::new(2, BackpressurePolicy::Block);
        buffer.try_push(block(0)).unwrap();
        buffer.try_push(block(1)).unwrap();

        let rejected = buffer.try_push(block(2)).unwrap_err();
        assert_eq!(rejected.sequence, 2);
        assert_eq!(buffer.status().overflow_count, 0);
    }

    #[test]
    fn test_drain_respects_limit() {
        let buffer = SampleBuffer::new(8, BackpressurePolicy::Block);
        for i in 0..5 {
            buffer.try_push(block(i)).unwrap();
        }
        assert_eq!(buffer.drain(2).len(), 2);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.status().drained, 2);
    }

    #[tokio::test]
    async fn test_blocked_push_resumes_after_drain() {
        let buffer = Arc::new(SampleBuffer::new(1, BackpressurePolicy::Block));
        let cancel = Arc::new(AtomicBool::new(false));
        buffer.try_push(block(0)).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                buffer.push(block(1), &cancel, Duration::from_millis(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(buffer.drain(1)[0].sequence, 0);
        assert!(producer.await.unwrap());
        assert_eq!(buffer.drain(1)[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_blocked_push_observes_cancel() {
        let buffer = SampleBuffer::new(1, BackpressurePolicy::Block);
        let cancel = AtomicBool::new(true);
        buffer.try_push(block(0)).unwrap();

        let stored = buffer.push(block(1), &cancel, Duration::from_millis(5)).await;
        assert!(!stored);
        assert_eq!(buffer.len(), 1);
    }
}
