//! # Caxton - Multi-Agent Orchestration Runtime
//!
//! Caxton hosts populations of named agents behind a small, uniform
//! contract (`Agent`), dispatches messages between them either in-process
//! or over gRPC to other nodes, and composes them into higher-order
//! patterns (`orchestration`) like voted ensembles and classify-then-route
//! chains.
//!
//! ## Core components
//!
//! - **Agent contract** (`agent`): the `Agent` trait plus optional
//!   session-aware, checkpointable, and memory-aware extensions.
//! - **Messages** (`message`): the immutable envelope passed between
//!   agents.
//! - **Dependency graph** (`graph`): levelizes agent startup order.
//! - **Local runtime** (`runtime`): in-process registry, buffered
//!   mailboxes, bounded concurrent `Call`/`CallParallel`, phased startup.
//! - **Distributed runtime** (`distributed`): the same contract reached
//!   transparently over gRPC, with TLS/mTLS posture control.
//! - **Storage & sessions** (`storage`, `session`): append-only
//!   persistence, checkpoint/restore, and a session cache over it.
//! - **Voting** (`voting`): deterministic reconciliation of multiple
//!   agents' answers into one.
//! - **Orchestration** (`orchestration`): `Parallel`, `Ensemble`,
//!   `Sequential`, `Router` composed over the above.
//!
//! ## Configuration and observability
//!
//! `config` holds `Serialize`/`Deserialize` configuration structs with
//! spec-matching defaults; `observability` exposes atomic runtime metrics
//! and a channel-utilization warning hook. Logging throughout uses
//! `tracing`; nothing here exports telemetry on its own.

pub mod agent;
pub mod config;
pub mod distributed;
pub mod error;
pub mod graph;
pub mod message;
pub mod observability;
pub mod orchestration;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod voting;

pub use agent::{Agent, AgentName, CheckpointableAgent, MemoryAwareAgent, MemoryReader, SessionAwareAgent};
pub use config::{CaxtonConfig, DistributedConfig, RuntimeConfig, SessionConfig};
pub use error::CaxtonError;
pub use graph::DependencyGraph;
pub use message::Message;
pub use runtime::Runtime;
pub use session::{Session, SessionManager};
pub use storage::StorageBackend;
pub use voting::{vote, Ballot, VoteOutcome, VotingStrategy};
