//! NFC Controller Interface protocol engine
//!
//! This crate sits between a device host application and an NFC controller
//! (NFCC) reached through an [`NciTransport`](nexum_nci_core::NciTransport).
//!
//! ## Overview
//!
//! - One control command in flight at a time, with a response watchdog
//! - Credit-based flow control on logical data connections
//! - Notification fan-out to subscribers
//! - The RF discovery state machine, recomputing discovery from scratch on
//!   every return to idle
//! - NFCEE mode switching and NFCEE discovery requests
//! - Listen-mode routing computed from host priorities
//! - High-level operations (START, STOP, RF enable/disable, ...) run one at
//!   a time
//!
//! The engine is sans-IO: it never blocks, spawns or reads the clock behind
//! the caller's back beyond arming timers. The host feeds inbound packets to
//! [`Nci::receive`] and drives timers with [`Nci::poll_timeout`] and
//! [`Nci::handle_timeout`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod data;
pub mod nfcee;
pub mod operation;
pub mod registry;
pub mod rf;
pub mod routing;

mod dispatcher;
mod engine;
mod error;
mod timer;

pub use config::NciConfig;
pub use data::{ConnectionState, LogicalConnection, SendCallback};
pub use dispatcher::ResponseCallback;
pub use engine::{DataCallback, Nci};
pub use error::{Error, Result, ResultExt};
pub use nfcee::{Nfcee, NfceeMode, NfceeState};
pub use operation::{Operation, OperationCallback};
pub use registry::{NotificationCallback, SubscriptionId};
pub use rf::{RfDiscovery, RfState};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        DataCallback, Error, Nci, NciConfig, NfceeMode, Operation, OperationCallback,
        ResponseCallback, Result, ResultExt, RfState, SendCallback, SubscriptionId,
    };
    pub use nexum_nci_core::prelude::*;
}
