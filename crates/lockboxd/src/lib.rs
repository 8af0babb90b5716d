//! lockboxd: the vault server
//!
//! Serves the `Auth` and `Resources` gRPC services. Payloads arrive already
//! encrypted by the client and are stored as opaque bytes; the server never
//! holds a private key.

pub mod auth;
pub mod daemon;
pub mod grpc;
pub mod metrics;
pub mod resources;
