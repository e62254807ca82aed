//! Decode workers.
//!
//! Worker `i` exclusively consumes `raw_ring[i]` and produces into
//! `evt_ring[i]`; no other thread touches either end. Each pop wakes a
//! possibly stalled poller through the ring's epoch, decrements the
//! aggregate raw counter (requesting resumption at the low watermark), runs
//! the currently routed decoder against a reusable output buffer, and
//! publishes the resulting event with a coalesced host wakeup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rdkafka::message::{Message, OwnedMessage};
use tracing::debug;

use tapline_abi::{
    ByteView, DecodeOut, Envelope, StrView, DECODE_ERR, DECODE_NEED_MORE, DECODE_OK, DECODE_SKIP,
};

use crate::event::{ErrorMsg, Event, EventPayload};
use crate::notify::Notify;
use crate::registry::DecoderRegistry;
use crate::ring::{Consumer, Epoch, Producer};
use crate::watermark::Watermark;

pub(crate) struct DecodeWorker {
    id: usize,
    raw_rx: Consumer<OwnedMessage>,
    raw_epoch: Arc<Epoch>,
    evt_tx: Producer<Event>,
    registry: Arc<DecoderRegistry>,
    watermark: Arc<Watermark>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
    scratch: Vec<u8>,
}

impl DecodeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        raw_rx: Consumer<OwnedMessage>,
        raw_epoch: Arc<Epoch>,
        evt_tx: Producer<Event>,
        registry: Arc<DecoderRegistry>,
        watermark: Arc<Watermark>,
        notify: Arc<Notify>,
        stop: Arc<AtomicBool>,
        decode_buf_size: usize,
    ) -> Self {
        Self {
            id,
            raw_rx,
            raw_epoch,
            evt_tx,
            registry,
            watermark,
            notify,
            stop,
            scratch: vec![0u8; decode_buf_size],
        }
    }

    pub fn run(mut self) {
        debug!(worker = self.id, "decode worker started");

        while !self.stop.load(Ordering::Acquire) {
            let Some(raw) = self.raw_rx.try_pop() else {
                // The stop path sets the flag before bumping, so a stale
                // `seen` here cannot strand us in the wait.
                let seen = self.raw_epoch.now();
                if self.stop.load(Ordering::Acquire) {
                    break;
                }
                self.raw_epoch.wait(seen);
                continue;
            };

            self.raw_epoch.bump_one();
            self.watermark.msg_drained();

            let mut event = self.decode(&raw);
            drop(raw);

            loop {
                match self.evt_tx.try_push(event) {
                    Ok(()) => break,
                    Err(back) => {
                        if self.stop.load(Ordering::Acquire) {
                            debug!(worker = self.id, "decode worker stopped, event dropped");
                            return;
                        }
                        event = back;
                        thread::yield_now();
                    }
                }
            }

            self.notify.signal();
        }

        debug!(worker = self.id, "decode worker stopped");
    }

    fn decode(&mut self, raw: &OwnedMessage) -> Event {
        let topic = raw.topic().to_string();
        let key = raw.key().map(<[u8]>::to_vec).unwrap_or_default();
        let ts_ms = raw.timestamp().to_millis();
        let ingest_ns = match ts_ms {
            Some(ms) if ms >= 0 => ms * 1_000_000,
            _ => 0,
        };

        let Some(decoder) = self.registry.decoder_for(&topic) else {
            return Event {
                topic,
                key,
                ingest_ns,
                decoder: String::new(),
                payload: EventPayload::Error(ErrorMsg::new("decoder not bound")),
            };
        };

        let env = Envelope {
            topic: StrView::from_str(raw.topic()),
            partition: raw.partition(),
            offset: raw.offset(),
            timestamp_ms: ts_ms.unwrap_or(-1),
            key: raw.key().map(ByteView::from_slice).unwrap_or_else(ByteView::empty),
            payload: raw
                .payload()
                .map(ByteView::from_slice)
                .unwrap_or_else(ByteView::empty),
        };
        let mut out = DecodeOut::with_buffer(&mut self.scratch);
        let rc = unsafe { (decoder.func)(&env, &mut out) };

        let payload = if rc != 0 {
            EventPayload::Error(ErrorMsg::new(&format!("decoder internal failure (rc={rc})")))
        } else {
            match out.kind {
                DECODE_OK => {
                    let len = out.len.min(out.cap);
                    EventPayload::Data(self.scratch[..len].to_vec())
                }
                DECODE_ERR => EventPayload::Error(ErrorMsg::from_raw(out.err_msg_bytes())),
                DECODE_NEED_MORE => {
                    EventPayload::Error(ErrorMsg::new("decoder needs larger buffer"))
                }
                DECODE_SKIP => EventPayload::Error(ErrorMsg::new("decoder skipped message")),
                other => EventPayload::Error(ErrorMsg::new(&format!(
                    "decoder returned unknown result kind {other}"
                ))),
            }
        };

        Event {
            topic,
            key,
            ingest_ns,
            decoder: decoder.name().to_string(),
            payload,
        }
    }
}
