//! # Kairos gRPC
//!
//! gRPC listener for the Kairos runtime, built on `tonic`.
//!
//! Every call passes through two tower layers: observability (a
//! `grpc.request` span, a log line and the `app_grpc_*` metrics) around
//! panic recovery (a panicking method answers `INTERNAL` and the listener
//! keeps serving).
//!
//! Services that implement [`InjectContainer`](kairos_core::InjectContainer)
//! receive the shared container through [`GrpcServer::add_injected`] before
//! they become reachable. The resulting [`GrpcListener`] implements
//! [`kairos_server::Listener`], so it starts, fails and drains under the same
//! supervisor as the HTTP listeners.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod layers;
pub mod server;

pub use config::{GrpcConfig, DEFAULT_GRPC_PORT};
pub use error::{GrpcError, GrpcResult};
pub use layers::{ObservabilityLayer, RecoveryLayer};
pub use server::{GrpcListener, GrpcServer, REFLECTION_SERVICE};
