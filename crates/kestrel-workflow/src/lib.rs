//! Kestrel provisioning workflows
//!
//! Turns a base image plus network parameters into a configured appliance
//! VM, and answers the inventory, delete and image listing requests around
//! it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  TaskQueue                           │
//! │   bounded channel -> N workers -> status table       │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │           DispatchTable                     │    │
//! │  │   show | create | delete | image            │    │
//! │  └─────────────────────────────────────────────┘    │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │           Provisioner                       │    │
//! │  │   ImageCatalog, Hypervisor, ActionEngine    │    │
//! │  └─────────────────────────────────────────────┘    │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │         ProvisionEvent Stream               │    │
//! │  │   StageChanged | ActionProgress | Completed │    │
//! │  └─────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kestrel_workflow::{DispatchTable, Provisioner, TaskQueue, TaskRequest};
//! use std::sync::Arc;
//!
//! let provisioner = Arc::new(Provisioner::new(hypervisor, uploader, config.clone()));
//! let queue = TaskQueue::spawn(provisioner, DispatchTable::standard()?, &config.worker, "appliance");
//!
//! let id = queue.submit(TaskRequest::Image, "txn-1").await?;
//! ```

pub mod catalog;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod task;

pub use catalog::ImageCatalog;
pub use error::*;
pub use orchestrator::*;
pub use queue::*;
pub use task::*;
