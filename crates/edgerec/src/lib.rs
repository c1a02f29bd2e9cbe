//! `edgerec` - An unattended media recorder for edge devices
//!
//! This library provides the core functionality for recording media from a
//! local byte source into bounded storage with circular-buffer eviction,
//! and opportunistically uploading finished files to a remote endpoint.
//! Recording always takes priority over uploads; a single cooperative
//! scheduler enforces that ordering.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod scheduler;
pub mod store;
pub mod uploader;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use media::{AlwaysConnected, ConnectivityMonitor, FileFrameSource, FrameSource, MediaFile};
pub use scheduler::{Scheduler, SchedulerSettings};
pub use store::{MediaStore, StorageBudget, StorageUsage};
pub use uploader::{CoordinatorSettings, UploadCoordinator, UploaderState, UploaderStatus};
