//! patchpilot: a structural index of Python repositories plus a bounded
//! propose / apply / test / debug loop driven by an external change oracle.

pub mod config;
pub mod controller;
pub mod errors;
pub mod evidence;
pub mod index;
pub mod indexer;
pub mod oracle;
pub mod patch;
pub mod query;
pub mod runner;
pub mod session;
pub mod workflow;

pub use errors::{PilotError, Result};
