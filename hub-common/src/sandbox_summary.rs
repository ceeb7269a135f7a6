use hub_protocol::config::SandboxMode;

/// One-line startup banner summary, mirroring the agent's own sandbox
/// summary line.
pub fn summarize_sandbox_mode(mode: SandboxMode) -> &'static str {
    match mode {
        SandboxMode::ReadOnly => "read-only",
        SandboxMode::WorkspaceWrite => "workspace-write",
        SandboxMode::DangerFullAccess => "danger-full-access",
    }
}
