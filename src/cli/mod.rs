//! Medic CLI
//!
//! Commands:
//! - `medic run` - Run the troubleshooting loop
//! - `medic check` - One-shot service health table
//! - `medic detect` - One-shot failure detection, no recovery
//! - `medic guide` - Playbook for a failure type
//! - `medic config` - Effective configuration

pub mod output;
pub mod runtime;

pub use output::OutputMode;
pub use runtime::{Cli, Commands};
