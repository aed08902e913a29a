//! Terminal data agent powered by steward-rs.
//!
//! The `steward` binary wires the orchestrator to a console UI, the
//! built-in tools, a session file and an audit log:
//!
//! ```sh
//! # One-shot mode
//! steward --sql-command 'mysql -B -e "$STEWARD_SQL" shop' --prompt "How many orders shipped today?"
//!
//! # Interactive mode (default)
//! steward --workdir /srv/app --session .steward/session.json
//! ```
//!
//! The library half exposes [`CliConfig`] so the same wiring can be reused:
//!
//! ```ignore
//! use steward_cli::CliConfig;
//!
//! let config = CliConfig::default();
//! let registry = config.build_registry()?;
//! let agent_config = config.build_agent_config();
//! ```

pub mod config;
pub mod interrupt;

pub use config::CliConfig;
pub use interrupt::{InterruptAction, Interrupts};
