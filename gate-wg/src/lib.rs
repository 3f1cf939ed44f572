//! WireGuard plumbing for rugate
//!
//! Both roles drive the host's WireGuard toolchain through well-defined
//! command-line verbs rather than speaking the tunnel protocol themselves.
//! This crate wraps those verbs behind [`TunnelDriver`], models wg-quick
//! configuration files, and ships a mock driver for tests.

pub mod config;
pub mod driver;
pub mod error;
pub mod mock;

pub use config::{WgConfigFile, WgInterface, WgPeerSection};
pub use driver::{is_valid_wg_key, TunnelDriver, WgDriver};
pub use error::{Error, Result};
pub use mock::MockDriver;
