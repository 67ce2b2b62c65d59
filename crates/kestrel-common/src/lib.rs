//! Types shared by every Kestrel crate: error kinds, network parameters,
//! instance metadata, task wire types and configuration.

pub mod config;
pub mod error;
pub mod models;
pub mod network;

pub use config::KestrelConfig;
pub use error::{Error, ErrorKind};
pub use models::*;
pub use network::NetworkConfig;

pub type Result<T> = std::result::Result<T, Error>;
