//! Session establishment and aggregation for federated training pairs.
//!
//! A training fleet is organized as leader/follower pairs. Each pair
//! shares a small key-value store for handshake signalling and a duplex
//! transport for bulk payloads; there is no other channel between the
//! parties. On top of that this crate provides:
//!
//! - [`session`]: the round protocol of one pair. Upload and download
//!   are negotiated through `PUSH`/`PULL` status records in the store,
//!   payloads cross the transport through a pluggable transform chain,
//!   and an unreachable peer degrades to a cached status instead of
//!   failing reads.
//! - [`connection`]: how pairs come to be. The leader sweeps a set of
//!   rendezvous addresses with bounded retries in the background; a
//!   follower blocks on its single address.
//! - [`aggregator`]: the leader-side engine folding downloaded
//!   contributions into the model parameters, by running merge or
//!   stacked batch, with plain, instance-weighted or elastic operators,
//!   and reducing the per-contribution task reports into one summary.
//!
//! The [`transport`] module only defines the seams ([`transport::Connector`],
//! [`transport::PairTransport`], [`store::KvStore`]) plus in-memory
//! implementations; binding a real process-group backend is left to the
//! embedding application.

pub mod address;
pub mod aggregator;
pub mod common;
pub mod connection;
pub mod params;
pub mod session;
pub mod settings;
pub mod store;
pub mod task;
pub mod transport;

pub use crate::{
    aggregator::Aggregator,
    common::Role,
    params::{ParamArena, Parameter},
    session::{Session, SessionError, TransferOutcome},
    settings::{init_logging, Settings},
    task::TaskInfo,
};
