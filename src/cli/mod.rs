//! # CLI Module
//!
//! Command-line entry points of the `whiteboard` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Start a whiteboard from a configuration file and serve until SIGINT or
//! SIGTERM:
//!
//! ```bash
//! whiteboard serve --config whiteboard.yaml --watch
//! ```
//!
//! - `--config <FILE>` - Whiteboard configuration (required)
//! - `--watch` - Reload declared providers when the file changes
//!
//! ### `status`
//!
//! Print the status document the configuration resolves to, without binding
//! a port:
//!
//! ```bash
//! whiteboard status --config whiteboard.yaml
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{run_cli, status_json, Cli, Commands};
