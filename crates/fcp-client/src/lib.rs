//! Client engine for the Freenet Client Protocol (FCP).
//!
//! The crate drives a single long-lived TCP connection to an FCP daemon.
//! Callers open an [`FcpClient`], submit jobs (key generation, fetches,
//! inserts, plugin messages, persistent-queue management), and either
//! block on the returned [`JobTicket`] or watch it through a
//! [`StatusObserver`]. A dedicated coordinator thread owns the socket,
//! multiplexing queued commands out and routing daemon replies back to
//! their tickets.

mod client;
pub mod config;
mod coordinator;
mod dispatch;
mod errors;
mod registry;
mod sync;
pub mod telemetry;
mod ticket;
mod transport;


pub use client::{
    FcpClient, FetchOptions, FetchResult, InsertOptions, InsertSource, OutputMode,
};
pub use config::{Config, EndpointParseError, LogFormat, NodeEndpoint};
pub use errors::FcpError;
pub use fcp_wire::{Command, FieldValue, KeyKind, Message, Persistence, WireError};
pub use ticket::{FetchData, JobOutcome, JobStatus, JobTicket, NoopObserver, StatusObserver, Worklist};
pub use transport::EXPECTED_VERSION;
