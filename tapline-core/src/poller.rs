//! The broker-facing poller thread.
//!
//! Exactly one poller drives the `BaseConsumer`: it applies pending resume
//! requests, polls with a short timeout, shards detached messages across the
//! worker rings round-robin, and pauses the current assignment when the
//! aggregate raw occupancy crosses the high watermark. Pause and resume are
//! only ever issued under the assignment mutex, against the assignment most
//! recently stored by the rebalance callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance};
use rdkafka::message::OwnedMessage;
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{debug, warn};

use crate::ring::{Epoch, Producer};
use crate::watermark::Watermark;

/// Shared handle to the consumer's current partition assignment.
pub(crate) type Assignment = Arc<Mutex<Option<TopicPartitionList>>>;

/// Client context wired into the consumer; keeps the assignment snapshot in
/// sync from the rebalance callbacks (which run on the poller thread, inside
/// `poll`). The broker-side assign/unassign is performed by the default
/// `rebalance` plumbing around these hooks.
pub(crate) struct PollerContext {
    assignment: Assignment,
}

impl PollerContext {
    pub fn new(assignment: Assignment) -> Self {
        Self { assignment }
    }
}

impl ClientContext for PollerContext {}

impl ConsumerContext for PollerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                debug!(partitions = tpl.count(), "rebalance: assign");
                *self.assignment.lock() = Some((*tpl).clone());
            }
            Rebalance::Revoke(_) => {
                debug!("rebalance: revoke");
                *self.assignment.lock() = None;
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "rebalance error");
                *self.assignment.lock() = None;
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        debug!(?rebalance, "rebalance applied");
    }
}

pub(crate) struct Poller {
    consumer: Arc<BaseConsumer<PollerContext>>,
    assignment: Assignment,
    watermark: Arc<Watermark>,
    stop: Arc<AtomicBool>,
    raw_txs: Vec<Producer<OwnedMessage>>,
    raw_epochs: Vec<Arc<Epoch>>,
    rr: usize,
}

impl Poller {
    pub fn new(
        consumer: Arc<BaseConsumer<PollerContext>>,
        assignment: Assignment,
        watermark: Arc<Watermark>,
        stop: Arc<AtomicBool>,
        raw_txs: Vec<Producer<OwnedMessage>>,
        raw_epochs: Vec<Arc<Epoch>>,
    ) -> Self {
        Self {
            consumer,
            assignment,
            watermark,
            stop,
            raw_txs,
            raw_epochs,
            rr: 0,
        }
    }

    pub fn run(mut self) {
        debug!("poller started");

        while !self.stop.load(Ordering::Acquire) {
            if self.watermark.is_paused() && self.watermark.take_resume_request() {
                self.resume();
            }

            let Some(result) = self.consumer.poll(Duration::from_millis(100)) else {
                continue;
            };
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    // Transport-level failure; per-topic decode errors flow
                    // through the event stream instead.
                    warn!(error = %e, "broker transport error");
                    continue;
                }
            };

            let mut raw = msg.detach();
            let worker = self.next_worker(&raw);

            loop {
                match self.raw_txs[worker].try_push(raw) {
                    Ok(()) => break,
                    Err(back) => {
                        raw = back;
                        self.maybe_pause();

                        let epoch = &self.raw_epochs[worker];
                        let seen = epoch.now();
                        if self.stop.load(Ordering::Acquire) {
                            debug!("poller stopping, message abandoned");
                            return;
                        }
                        epoch.wait(seen);
                        if self.stop.load(Ordering::Acquire) {
                            debug!("poller stopping, message abandoned");
                            return;
                        }
                    }
                }
            }

            self.raw_epochs[worker].bump_one();
            self.watermark.msg_queued();
            self.maybe_pause();
        }

        debug!("poller stopped");
    }

    /// Worker selection. Round-robin; deterministic per arriving message so
    /// ordering behaviour stays documentable. Sharding by (topic, partition)
    /// would preserve per-partition order and slots in here.
    fn next_worker(&mut self, _msg: &OwnedMessage) -> usize {
        let worker = self.rr % self.raw_txs.len();
        self.rr = self.rr.wrapping_add(1);
        worker
    }

    fn maybe_pause(&self) {
        if self.watermark.is_paused() || !self.watermark.over_high() {
            return;
        }

        let assignment = self.assignment.lock();
        let Some(tpl) = assignment.as_ref() else {
            return;
        };
        match self.consumer.pause(tpl) {
            Ok(()) => {
                self.watermark.set_paused(true);
                debug!(
                    total_raw = self.watermark.total(),
                    partitions = tpl.count(),
                    "paused partitions at high watermark"
                );
            }
            Err(e) => warn!(error = %e, "pause failed"),
        }
    }

    fn resume(&self) {
        let assignment = self.assignment.lock();
        let Some(tpl) = assignment.as_ref() else {
            return;
        };
        match self.consumer.resume(tpl) {
            Ok(()) => {
                self.watermark.set_paused(false);
                debug!(partitions = tpl.count(), "resumed partitions");
            }
            Err(e) => warn!(error = %e, "resume failed"),
        }
    }
}
