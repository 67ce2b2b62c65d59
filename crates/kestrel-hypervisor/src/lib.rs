//! Hypervisor control-plane surface
//!
//! The provisioning engine only ever talks to the hypervisor through the
//! [`Hypervisor`] trait defined here. Concrete SDK bindings live outside
//! this workspace; [`MemoryHypervisor`] backs tests and demo mode.
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────────┐
//! │  kestrel-workflow    │      │  kestrel-guest           │
//! │  deploy/power/tag    │      │  upload/run/reconfigure  │
//! └──────────┬───────────┘      └────────────┬─────────────┘
//!            │                               │
//!            ▼                               ▼
//!        ┌─────────────────────────────────────────┐
//!        │        dyn Hypervisor + UploadClient     │
//!        └─────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;
pub mod transfer;
pub mod types;

pub use error::*;
pub use memory::{GuestCommand, MemoryHypervisor};
pub use traits::*;
pub use transfer::{HttpUploadClient, RoutedUploadClient, UploadClient};
pub use types::*;
