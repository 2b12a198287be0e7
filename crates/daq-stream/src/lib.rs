//! Stream Multiplexer: fans sampled telemetry out to any
//! number of duplex subscribers, sharing one timer across identical
//! subscriptions and surviving brief reconnects.

pub mod multiplexer;
pub mod subscription;

pub use multiplexer::{SamplerFactory, StreamMultiplexer};
pub use subscription::{ProducerKey, StreamMessage, SubscriberQueue, DEFAULT_QUEUE_DEPTH, DEFAULT_RESUME_GRACE_SECS};
