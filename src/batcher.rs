// Outbound message batching
// Coalesces rapid sends to the same destination into one wire frame, with a bounded wait.
// The batcher never sleeps itself: callers pass in the current instant and poll
// `next_deadline`, so the session loop owns the only timer.

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Timing policy for batching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Quiet period after the latest payload before the batch is flushed
    pub delay: Duration,
    /// Upper bound between the first buffered payload and its flush
    pub max_window: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            max_window: Duration::from_millis(2000),
        }
    }
}

/// Scheduled flush for one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTimer {
    Disarmed,
    Armed { fires_at: Instant },
}

/// What a `push` did to the destination's timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// First payload of a new batch; timer armed
    Armed,
    /// Timer pushed back to wait for more payloads
    Rearmed,
    /// Window exhausted; existing timer left untouched
    Held,
}

#[derive(Debug)]
struct PendingBatch {
    payloads: Vec<String>,
    opened_at: Instant,
    timer: FlushTimer,
}

/// A batch taken out of the batcher, ready to be written to the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyBatch {
    pub to: String,
    pub payloads: Vec<String>,
    pub opened_at: Instant,
}

impl ReadyBatch {
    /// Wire bodies: the buffered payloads as consecutive JSON arrays of at most
    /// `max_len` bytes each, in call order. A payload too large for any array is
    /// still sent, alone.
    pub fn bodies(&self, max_len: usize) -> Result<Vec<String>> {
        let mut bodies = Vec::new();
        let mut chunk: Vec<&str> = Vec::new();
        let mut chunk_len = 2; // "[]"
        for payload in &self.payloads {
            let encoded = serde_json::to_string(payload)?.len();
            let mut added = if chunk.is_empty() { encoded } else { encoded + 1 };
            if !chunk.is_empty() && chunk_len + added > max_len {
                bodies.push(serde_json::to_string(&chunk)?);
                chunk.clear();
                chunk_len = 2;
                added = encoded;
            }
            chunk.push(payload);
            chunk_len += added;
        }
        if !chunk.is_empty() {
            bodies.push(serde_json::to_string(&chunk)?);
        }
        Ok(bodies)
    }
}

#[derive(Debug, Default)]
pub struct OutboundBatcher {
    policy: BatchPolicy,
    batches: HashMap<String, PendingBatch>,
}

impl OutboundBatcher {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            batches: HashMap::new(),
        }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Buffer `payload` for `to` and arm or extend its flush timer
    pub fn push(&mut self, to: &str, payload: String, now: Instant) -> Scheduled {
        let policy = self.policy;
        let batch = self
            .batches
            .entry(to.to_string())
            .or_insert_with(|| PendingBatch {
                payloads: Vec::new(),
                opened_at: now,
                timer: FlushTimer::Disarmed,
            });
        batch.payloads.push(payload);

        match batch.timer {
            FlushTimer::Disarmed => {
                batch.opened_at = now;
                batch.timer = FlushTimer::Armed {
                    fires_at: now + policy.delay,
                };
                Scheduled::Armed
            }
            FlushTimer::Armed { .. } => {
                if now.duration_since(batch.opened_at) < policy.max_window {
                    // Never rearm past the window, so the first payload waits at most max_window
                    let fires_at = (now + policy.delay).min(batch.opened_at + policy.max_window);
                    batch.timer = FlushTimer::Armed { fires_at };
                    Scheduled::Rearmed
                } else {
                    Scheduled::Held
                }
            }
        }
    }

    /// Earliest armed flush across all destinations
    pub fn next_deadline(&self) -> Option<Instant> {
        self.batches
            .values()
            .filter_map(|batch| match batch.timer {
                FlushTimer::Armed { fires_at } => Some(fires_at),
                FlushTimer::Disarmed => None,
            })
            .min()
    }

    /// Take every batch whose timer has fired, disarming it. Each armed timer yields at most one batch.
    pub fn take_due(&mut self, now: Instant) -> Vec<ReadyBatch> {
        let mut ready: Vec<ReadyBatch> = self
            .batches
            .iter_mut()
            .filter_map(|(to, batch)| match batch.timer {
                FlushTimer::Armed { fires_at } if fires_at <= now => Some(Self::take(to, batch)),
                _ => None,
            })
            .collect();
        ready.sort_by_key(|batch| batch.opened_at);
        ready
    }

    /// Take every non-empty batch regardless of its timer
    pub fn drain(&mut self) -> Vec<ReadyBatch> {
        let mut ready: Vec<ReadyBatch> = self
            .batches
            .iter_mut()
            .filter(|(_, batch)| !batch.payloads.is_empty())
            .map(|(to, batch)| Self::take(to, batch))
            .collect();
        ready.sort_by_key(|batch| batch.opened_at);
        self.batches.clear();
        ready
    }

    /// Discard everything buffered, returning how many payloads were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.batches.values().map(|batch| batch.payloads.len()).sum();
        self.batches.clear();
        dropped
    }

    pub fn pending(&self, to: &str) -> usize {
        self.batches.get(to).map_or(0, |batch| batch.payloads.len())
    }

    pub fn timer(&self, to: &str) -> FlushTimer {
        self.batches
            .get(to)
            .map_or(FlushTimer::Disarmed, |batch| batch.timer)
    }

    fn take(to: &str, batch: &mut PendingBatch) -> ReadyBatch {
        batch.timer = FlushTimer::Disarmed;
        ReadyBatch {
            to: to.to_string(),
            payloads: std::mem::take(&mut batch.payloads),
            opened_at: batch.opened_at,
        }
    }
}
