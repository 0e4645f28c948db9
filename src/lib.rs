//! `partitionq`: a durable, partitioned pub/sub message broker core.
//!
//! A partition is a [`queue::writer::Queue`] (append-only segmented log)
//! paired with one [`queue::reader::Reader`] per consumer group; each
//! reader feeds a [`channel::Channel`], which layers in-flight tracking,
//! requeue/deferred delivery and dead-lettering on top. Producer and
//! consumer membership across a cluster is tracked by
//! [`registration::RegistrationDb`], and [`cluster::aggregator::ClusterInfo`]
//! fans queries out across a cluster's nodes and merges the results.

pub mod channel;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod message;
pub mod queue;
pub mod registration;

pub use channel::Channel;
pub use clock::{Clock, SystemClock, TestClock};
pub use cluster::aggregator::ClusterInfo;
pub use config::{ChannelConfig, ClusterClientConfig, QueueConfig, ReaderConfig, RegistrationConfig};
pub use message::{CounterIdSource, IdSource, Message, MessageId};
pub use queue::{Queue, Reader};
pub use registration::RegistrationDb;
