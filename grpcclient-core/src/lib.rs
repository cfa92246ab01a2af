//! Core protocol types for grpcclient.
//!
//! This crate provides the vocabulary shared by the client decoration layer
//! (`grpcclient`) and anything that implements a transport for it.
//!
//! ## Types
//!
//! - [`Code`]: gRPC status codes
//! - [`Compression`]: The fixed set of compression codec names a client may select

mod code;
mod compression;

pub use code::*;
pub use compression::*;
