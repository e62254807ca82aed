//! Tapline core - Kafka consumption pipeline for single-threaded hosts
//!
//! One poller thread drives the broker client and shards raw messages
//! across N decode workers over lock-free SPSC rings; workers run
//! hot-swappable plugin decoders and publish finished events; the host pulls
//! batches through a non-blocking [`Core::drain`] paired with a readiness
//! file descriptor ([`Core::notify_fd`]). Backpressure pauses and resumes
//! broker partitions around high/low occupancy watermarks, so a slow host
//! never drops data and never blocks the poller.
//!
//! ```no_run
//! use tapline_core::{Core, DecodeConfig, KafkaConfig};
//!
//! let mut core = Core::new(DecodeConfig::default(), KafkaConfig::default())?;
//! core.bind_topic("trades", "./libtrades_decoder.so", "decode_trade")?;
//! core.subscribe(&["trades"])?;
//!
//! let fd = core.notify_fd().expect("started");
//! let mut batch = Vec::new();
//! loop {
//!     // poll(fd) for readability, read it to EAGAIN, then:
//!     core.drain(&mut batch, 4096);
//!     for event in batch.drain(..) {
//!         // hand to the host runtime
//!     }
//!     # break;
//! }
//! # Ok::<(), tapline_core::Error>(())
//! ```

#![warn(clippy::all)]

pub mod builtin;
mod core;
pub mod event;
mod notify;
mod poller;
pub mod registry;
pub mod ring;
mod watermark;
mod worker;

pub use crate::core::Core;
pub use event::{ErrorMsg, Event, EventPayload, ERROR_MSG_CAP};
pub use registry::{BindingInfo, Decoder, DecoderRegistry};

pub use tapline_common::config::{DecodeConfig, KafkaConfig};
pub use tapline_common::error::{Error, PluginError, Result};
