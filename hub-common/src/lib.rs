//! Ambient stack shared by `hub-core` and `hub-cli`: logging init, layered
//! settings loading, and (behind the `cli` feature) the `clap`-derive arg
//! types the binary crate flattens into its own parser.

#[cfg(feature = "cli")]
pub mod cli_args;
#[cfg(feature = "elapsed")]
pub mod elapsed;
pub mod logging;
pub mod sandbox_summary;
pub mod settings;

pub use settings::HubSettings;
pub use settings::SettingsError;
pub use settings::TransportPreference;
