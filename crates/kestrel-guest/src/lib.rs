//! Guest-side provisioning actions
//!
//! Everything that happens inside a freshly deployed VM goes through the
//! hypervisor's guest agent: files are pushed with [`GuestFileTransfer`] and
//! shell commands run through [`CommandRunner`]. The provisioning steps built
//! on top of them are [`Action`]s held in an [`ActionEngine`].
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            ActionEngine                  │
//! │  network-config | disk-attach | desktop  │
//! └──────────────────┬──────────────────────┘
//!                    │
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!  GuestFileTransfer     CommandRunner
//!   (retry on boot)    (timeout + policy)
//! ```

pub mod actions;
pub mod command;
pub mod context;
pub mod engine;
pub mod error;
pub mod progress;
pub mod traits;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use command::{CommandOutcome, CommandPolicy, CommandRunner, CommandSpec};
pub use context::*;
pub use engine::*;
pub use error::*;
pub use progress::*;
pub use traits::*;
pub use transfer::GuestFileTransfer;
