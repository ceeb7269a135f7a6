//! `clap`-derive arg types `hub-cli` flattens into its own parser. Available
//! when the `cli` feature is enabled.

use clap::Parser;
use clap::ValueEnum;
use hub_protocol::config::CollaborationMode;
use hub_protocol::config::PermissionMode;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum PermissionModeCliArg {
    #[default]
    Default,
    ReadOnly,
    SafeYolo,
    Yolo,
}

impl From<PermissionModeCliArg> for PermissionMode {
    fn from(value: PermissionModeCliArg) -> Self {
        match value {
            PermissionModeCliArg::Default => PermissionMode::Default,
            PermissionModeCliArg::ReadOnly => PermissionMode::ReadOnly,
            PermissionModeCliArg::SafeYolo => PermissionMode::SafeYolo,
            PermissionModeCliArg::Yolo => PermissionMode::Yolo,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum CollaborationModeCliArg {
    Plan,
    #[default]
    Default,
}

impl From<CollaborationModeCliArg> for CollaborationMode {
    fn from(value: CollaborationModeCliArg) -> Self {
        match value {
            CollaborationModeCliArg::Plan => CollaborationMode::Plan,
            CollaborationModeCliArg::Default => CollaborationMode::Default,
        }
    }
}

/// Flattened into `hub-cli`'s top-level `Cli` struct.
#[derive(Parser, Debug)]
pub struct ModeArgs {
    /// Permission mode to start the session in.
    #[arg(long, value_enum, default_value_t = PermissionModeCliArg::Default)]
    pub permission_mode: PermissionModeCliArg,

    /// Collaboration mode (plan vs. default execution).
    #[arg(long, value_enum, default_value_t = CollaborationModeCliArg::Default)]
    pub collaboration_mode: CollaborationModeCliArg,

    /// Model override; when omitted the agent's own default is used.
    #[arg(long)]
    pub model: Option<String>,
}
