//! Core facade: lifecycle, configuration, and the public data/control plane.

use std::os::fd::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use tracing::info;

use tapline_common::config::{DecodeConfig, KafkaConfig};
use tapline_common::error::{Error, Result};

use crate::builtin;
use crate::event::Event;
use crate::notify::Notify;
use crate::poller::{Assignment, Poller, PollerContext};
use crate::registry::{BindingInfo, DecoderRegistry};
use crate::ring::{self, Epoch};
use crate::watermark::Watermark;
use crate::worker::DecodeWorker;

/// The Kafka consumption core.
///
/// Construction applies the Kafka settings to a client configuration; the
/// first [`Core::subscribe`] consumes that configuration into the broker
/// consumer and starts one poller thread plus N decode workers. The host
/// then polls [`Core::notify_fd`] for readability and pulls batches with
/// [`Core::drain`].
///
/// `drain`, `subscribe` and the bind operations are not safe to call
/// concurrently with themselves; a single-threaded host satisfies this by
/// construction (and `drain` takes `&mut self`).
pub struct Core {
    decode_cfg: DecodeConfig,
    client_config: Option<ClientConfig>,
    registry: Arc<DecoderRegistry>,
    watermark: Arc<Watermark>,
    stop: Arc<AtomicBool>,
    assignment: Assignment,
    consumer: Option<Arc<BaseConsumer<PollerContext>>>,
    notify: Option<Arc<Notify>>,
    evt_rxs: Vec<ring::Consumer<Event>>,
    raw_epochs: Vec<Arc<Epoch>>,
    poller_thread: Option<JoinHandle<()>>,
    worker_threads: Vec<JoinHandle<()>>,
    drain_rr: usize,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core").finish_non_exhaustive()
    }
}

impl Core {
    /// Validate the configuration and prepare the broker client config.
    ///
    /// Invalid Kafka *values* (unknown keys, malformed settings) are the
    /// client library's to reject and surface from [`Core::subscribe`].
    pub fn new(decode_cfg: DecodeConfig, kafka_cfg: KafkaConfig) -> Result<Self> {
        decode_cfg.validate()?;
        kafka_cfg.validate()?;

        let mut client_config = ClientConfig::new();
        if !kafka_cfg.bootstrap_servers.is_empty() {
            client_config.set("bootstrap.servers", kafka_cfg.bootstrap_servers.as_str());
        }
        if !kafka_cfg.group_id.is_empty() {
            client_config.set("group.id", kafka_cfg.group_id.as_str());
        }
        if !kafka_cfg.auto_offset_reset.is_empty() {
            client_config.set("auto.offset.reset", kafka_cfg.auto_offset_reset.as_str());
        }
        client_config.set(
            "enable.auto.commit",
            if kafka_cfg.enable_auto_commit {
                "true"
            } else {
                "false"
            },
        );
        for (key, value) in &kafka_cfg.extra {
            client_config.set(key.as_str(), value.as_str());
        }

        let watermark = Arc::new(Watermark::new(
            decode_cfg.raw_queue_size,
            decode_cfg.high_watermark_ratio,
            decode_cfg.low_watermark_ratio,
        ));

        Ok(Self {
            decode_cfg,
            client_config: Some(client_config),
            registry: Arc::new(DecoderRegistry::new()),
            watermark,
            stop: Arc::new(AtomicBool::new(false)),
            assignment: Arc::new(Mutex::new(None)),
            consumer: None,
            notify: None,
            evt_rxs: Vec::new(),
            raw_epochs: Vec::new(),
            poller_thread: None,
            worker_threads: Vec::new(),
            drain_rr: 0,
        })
    }

    /// Set one broker client key. Pre-subscribe only.
    pub fn set_conf(&mut self, key: &str, value: &str) -> Result<()> {
        match self.client_config.as_mut() {
            Some(config) => {
                config.set(key, value);
                Ok(())
            }
            None => Err(Error::AlreadyStarted),
        }
    }

    /// Create the broker consumer, subscribe to `topics`, and start the
    /// pipeline. On error no threads are left running and the client
    /// configuration stays usable for another attempt.
    pub fn subscribe(&mut self, topics: &[&str]) -> Result<()> {
        if self.poller_thread.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let client_config = self.client_config.as_ref().ok_or(Error::AlreadyStarted)?;

        let context = PollerContext::new(Arc::clone(&self.assignment));
        let consumer: BaseConsumer<PollerContext> = client_config.create_with_context(context)?;
        consumer.subscribe(topics)?;
        let consumer = Arc::new(consumer);

        self.start(Arc::clone(&consumer))?;

        // The configuration is consumed by the live consumer.
        self.client_config = None;
        self.consumer = Some(consumer);
        info!(?topics, workers = self.decode_cfg.decode_threads, "subscribed");
        Ok(())
    }

    fn start(&mut self, consumer: Arc<BaseConsumer<PollerContext>>) -> Result<()> {
        let n = self.decode_cfg.decode_threads;
        let notify = Arc::new(Notify::new()?);

        let mut raw_txs = Vec::with_capacity(n);
        let mut raw_epochs: Vec<Arc<Epoch>> = Vec::with_capacity(n);
        let mut evt_rxs = Vec::with_capacity(n);
        let mut workers = Vec::with_capacity(n);

        for i in 0..n {
            let (raw_tx, raw_rx) = ring::channel(self.decode_cfg.raw_queue_size);
            let (evt_tx, evt_rx) = ring::channel(self.decode_cfg.evt_queue_size);
            let epoch = Arc::new(Epoch::new());

            let worker = DecodeWorker::new(
                i,
                raw_rx,
                Arc::clone(&epoch),
                evt_tx,
                Arc::clone(&self.registry),
                Arc::clone(&self.watermark),
                Arc::clone(&notify),
                Arc::clone(&self.stop),
                self.decode_cfg.decode_buf_size,
            );
            let handle = match thread::Builder::new()
                .name(format!("tapline-decode-{i}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => handle,
                Err(e) => {
                    Self::halt_threads(&self.stop, &raw_epochs, workers, None);
                    return Err(e.into());
                }
            };

            raw_txs.push(raw_tx);
            raw_epochs.push(epoch);
            evt_rxs.push(evt_rx);
            workers.push(handle);
        }

        let poller = Poller::new(
            consumer,
            Arc::clone(&self.assignment),
            Arc::clone(&self.watermark),
            Arc::clone(&self.stop),
            raw_txs,
            raw_epochs.clone(),
        );
        let poller_thread = match thread::Builder::new()
            .name("tapline-poller".to_string())
            .spawn(move || poller.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                Self::halt_threads(&self.stop, &raw_epochs, workers, None);
                return Err(e.into());
            }
        };

        self.notify = Some(notify);
        self.evt_rxs = evt_rxs;
        self.raw_epochs = raw_epochs;
        self.worker_threads = workers;
        self.poller_thread = Some(poller_thread);
        Ok(())
    }

    /// Error-path rollback: stop whatever was spawned and leave the core
    /// usable for another subscribe attempt.
    fn halt_threads(
        stop: &AtomicBool,
        epochs: &[Arc<Epoch>],
        workers: Vec<JoinHandle<()>>,
        poller: Option<JoinHandle<()>>,
    ) {
        stop.store(true, Ordering::Release);
        for epoch in epochs {
            epoch.bump_all();
        }
        if let Some(handle) = poller {
            let _ = handle.join();
        }
        for handle in workers {
            let _ = handle.join();
        }
        stop.store(false, Ordering::Release);
    }

    /// Stop threads, close the broker consumer, and release the notify
    /// descriptor. Idempotent; also runs on drop.
    pub fn stop(&mut self) {
        let was_running = self.poller_thread.is_some();

        self.stop.store(true, Ordering::Release);
        for epoch in &self.raw_epochs {
            epoch.bump_all();
        }
        if let Some(handle) = self.poller_thread.take() {
            let _ = handle.join();
        }
        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }

        // Last reference: dropping closes the broker handle.
        self.consumer = None;
        *self.assignment.lock() = None;
        self.notify = None;
        self.evt_rxs.clear();
        self.raw_epochs.clear();

        if was_running {
            info!("core stopped");
        }
    }

    /// Bind a decoder from a shared object. Fails if the topic is bound.
    pub fn bind_topic(
        &self,
        topic: &str,
        so_path: impl AsRef<Path>,
        symbol: &str,
    ) -> Result<()> {
        self.registry.bind(topic, so_path, symbol)
    }

    /// Bind a decoder from a shared object, replacing any existing binding.
    pub fn rebind_topic(
        &self,
        topic: &str,
        so_path: impl AsRef<Path>,
        symbol: &str,
    ) -> Result<()> {
        self.registry.rebind(topic, so_path, symbol)
    }

    /// Remove a topic's decoder binding. Returns whether one existed.
    pub fn unbind_topic(&self, topic: &str) -> bool {
        self.registry.unbind(topic)
    }

    /// Bind the builtin passthrough decoder to `topic`.
    pub fn bind_builtin_topic(&self, topic: &str) -> Result<()> {
        self.registry
            .bind_builtin(topic, builtin::PASSTHROUGH, builtin::passthrough_decode)
    }

    /// The (path, symbol) pair currently bound for `topic`.
    pub fn decoder_info(&self, topic: &str) -> Option<BindingInfo> {
        self.registry.binding_info(topic)
    }

    /// The decoder registry, for direct control-plane access.
    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Pop up to `limit` events into `out`, spreading the starting ring
    /// fairly across workers. Non-blocking. Re-notifies the descriptor when
    /// events remain, otherwise re-arms the worker-side wakeup.
    pub fn drain(&mut self, out: &mut Vec<Event>, limit: usize) {
        drain_rings(
            &mut self.evt_rxs,
            self.notify.as_deref(),
            &mut self.drain_rr,
            out,
            limit,
        );
    }

    /// The readiness descriptor, `None` before [`Core::subscribe`].
    /// Non-blocking and close-on-exec; becomes readable when events are
    /// available, coalesced to one wakeup per drain cycle.
    pub fn notify_fd(&self) -> Option<RawFd> {
        self.notify.as_ref().map(|notify| notify.fd())
    }

    /// Decoded events currently waiting across all rings.
    pub fn pending_events(&self) -> usize {
        self.evt_rxs.iter().map(ring::Consumer::len).sum()
    }

    /// Number of topics with a bound decoder.
    pub fn bound_topics(&self) -> usize {
        self.registry.topic_count()
    }

    /// Whether the broker's partitions are currently paused for
    /// backpressure.
    pub fn is_paused(&self) -> bool {
        self.watermark.is_paused()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_rings(
    evt_rxs: &mut [ring::Consumer<Event>],
    notify: Option<&Notify>,
    drain_rr: &mut usize,
    out: &mut Vec<Event>,
    limit: usize,
) {
    let n = evt_rxs.len();
    if n == 0 {
        return;
    }

    let start = *drain_rr % n;
    *drain_rr = drain_rr.wrapping_add(1);

    for offset in 0..n {
        let idx = (start + offset) % n;
        while out.len() < limit {
            match evt_rxs[idx].try_pop() {
                Some(event) => out.push(event),
                None => break,
            }
        }
        if out.len() >= limit {
            break;
        }
    }

    if let Some(notify) = notify {
        if evt_rxs.iter().any(|rx| !rx.is_empty()) {
            notify.renotify();
        } else {
            notify.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::registry::BUILTIN_PATH;

    fn event(topic: &str, byte: u8) -> Event {
        Event {
            topic: topic.to_string(),
            key: Vec::new(),
            ingest_ns: 0,
            decoder: "passthrough".to_string(),
            payload: EventPayload::Data(vec![byte]),
        }
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let decode_cfg = DecodeConfig {
            decode_threads: 0,
            ..Default::default()
        };
        assert!(matches!(
            Core::new(decode_cfg, KafkaConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_pre_subscribe_surface() {
        let mut core = Core::new(DecodeConfig::default(), KafkaConfig::default()).unwrap();
        assert!(core.notify_fd().is_none());
        assert_eq!(core.pending_events(), 0);
        assert!(!core.is_paused());
        core.set_conf("fetch.min.bytes", "1").unwrap();

        let mut out = Vec::new();
        core.drain(&mut out, 128);
        assert!(out.is_empty());
    }

    #[test]
    fn test_bind_then_unbind_round_trip() {
        let core = Core::new(DecodeConfig::default(), KafkaConfig::default()).unwrap();
        core.bind_builtin_topic("t1").unwrap();

        let info = core.decoder_info("t1").expect("bound");
        assert_eq!(info.path, BUILTIN_PATH);
        assert_eq!(core.bound_topics(), 1);

        assert!(core.unbind_topic("t1"));
        assert!(core.decoder_info("t1").is_none());
        assert_eq!(core.bound_topics(), 0);
    }

    #[test]
    fn test_drain_respects_limit_and_rotates() {
        let (mut tx_a, rx_a) = ring::channel::<Event>(8);
        let (mut tx_b, rx_b) = ring::channel::<Event>(8);
        for i in 0..3 {
            tx_a.try_push(event("a", i)).unwrap();
            tx_b.try_push(event("b", i)).unwrap();
        }
        let mut rings = vec![rx_a, rx_b];
        let mut drain_rr = 0;

        let mut out = Vec::new();
        drain_rings(&mut rings, None, &mut drain_rr, &mut out, 4);
        assert_eq!(out.len(), 4);
        // First ring fully drained before moving on.
        assert!(out[..3].iter().all(|ev| ev.topic == "a"));
        assert_eq!(out[3].topic, "b");

        // Next call starts from the other ring.
        let mut rest = Vec::new();
        drain_rings(&mut rings, None, &mut drain_rr, &mut rest, 16);
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|ev| ev.topic == "b"));
    }

    #[test]
    fn test_drain_renotifies_when_events_remain() {
        let notify = Notify::new().unwrap();
        let (mut tx, rx) = ring::channel::<Event>(8);
        for i in 0..4 {
            tx.try_push(event("a", i)).unwrap();
        }
        let mut rings = vec![rx];
        let mut drain_rr = 0;

        // Simulate the worker-side wakeup for the burst, then read it.
        notify.signal();
        read_fd(&notify);

        let mut out = Vec::new();
        drain_rings(&mut rings, Some(&notify), &mut drain_rr, &mut out, 2);
        assert_eq!(out.len(), 2);
        // Events remain: the descriptor was made readable again.
        assert_eq!(read_fd(&notify), 1);

        out.clear();
        drain_rings(&mut rings, Some(&notify), &mut drain_rr, &mut out, 16);
        assert_eq!(out.len(), 2);
        // All empty: disarmed, no write until a worker signals again.
        assert_eq!(read_fd(&notify), 0);
        notify.signal();
        assert_eq!(read_fd(&notify), 1);
    }

    fn read_fd(notify: &Notify) -> u64 {
        let mut total = 0u64;
        loop {
            let mut buf = [0u8; 8];
            let n = unsafe { libc::read(notify.fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                return total;
            }
            total += u64::from_ne_bytes(buf);
        }
    }
}
