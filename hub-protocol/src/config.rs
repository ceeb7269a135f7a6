//! Configuration value object and derivation table (§6).

use serde::Deserialize;
use serde::Serialize;
use sha1::Digest;
use sha1::Sha1;

use crate::session::TurnMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Default,
    ReadOnly,
    SafeYolo,
    Yolo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollaborationMode {
    Plan,
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    Untrusted,
    OnFailure,
    OnRequest,
    Never,
}

/// The derivation table from §6. `sandbox`/`approval_policy` are *derived*
/// from `permission_mode` unless CLI overrides are present and
/// `permission_mode == Default` (the only mode in which overrides apply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub permission_mode: PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub collaboration_mode: CollaborationMode,
    pub sandbox: SandboxMode,
    pub approval_policy: ApprovalPolicy,
}

/// Overrides that only take effect when `permission_mode == Default`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliOverrides {
    pub approval_policy: Option<ApprovalPolicy>,
    pub sandbox: Option<SandboxMode>,
}

impl HubConfig {
    pub fn derive(
        permission_mode: PermissionMode,
        model: Option<String>,
        collaboration_mode: CollaborationMode,
        overrides: &CliOverrides,
    ) -> Self {
        let (default_approval, default_sandbox) = match permission_mode {
            PermissionMode::Default => (ApprovalPolicy::Untrusted, SandboxMode::WorkspaceWrite),
            PermissionMode::ReadOnly => (ApprovalPolicy::Never, SandboxMode::ReadOnly),
            PermissionMode::SafeYolo => (ApprovalPolicy::OnFailure, SandboxMode::WorkspaceWrite),
            PermissionMode::Yolo => (ApprovalPolicy::OnFailure, SandboxMode::DangerFullAccess),
        };

        let (approval_policy, sandbox) = if permission_mode == PermissionMode::Default {
            (
                overrides.approval_policy.unwrap_or(default_approval),
                overrides.sandbox.unwrap_or(default_sandbox),
            )
        } else {
            (default_approval, default_sandbox)
        };

        Self {
            permission_mode,
            model,
            collaboration_mode,
            sandbox,
            approval_policy,
        }
    }
}

/// Deterministic digest over `(permission_mode, model, collaboration_mode)`
/// (GLOSSARY "Mode hash"). A change forces a session restart (§4.8 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeHash(pub [u8; 20]);

impl ModeHash {
    pub fn compute(mode: &TurnMode) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{:?}", mode.permission_mode));
        hasher.update(b"\0");
        hasher.update(mode.model.as_deref().unwrap_or(""));
        hasher.update(b"\0");
        hasher.update(format!("{:?}", mode.collaboration_mode));
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }
}

impl std::fmt::Display for ModeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn default_mode_applies_overrides() {
        let overrides = CliOverrides {
            approval_policy: Some(ApprovalPolicy::Never),
            sandbox: Some(SandboxMode::ReadOnly),
        };
        let cfg = HubConfig::derive(PermissionMode::Default, None, CollaborationMode::Default, &overrides);
        assert_eq!(cfg.approval_policy, ApprovalPolicy::Never);
        assert_eq!(cfg.sandbox, SandboxMode::ReadOnly);
    }

    #[test]
    fn non_default_mode_ignores_overrides() {
        let overrides = CliOverrides {
            approval_policy: Some(ApprovalPolicy::Never),
            sandbox: Some(SandboxMode::ReadOnly),
        };
        let cfg = HubConfig::derive(PermissionMode::Yolo, None, CollaborationMode::Default, &overrides);
        assert_eq!(cfg.approval_policy, ApprovalPolicy::OnFailure);
        assert_eq!(cfg.sandbox, SandboxMode::DangerFullAccess);
    }

    #[test]
    fn derivation_table_matches_spec() {
        let o = CliOverrides::default();
        let default = HubConfig::derive(PermissionMode::Default, None, CollaborationMode::Default, &o);
        assert_eq!(default.approval_policy, ApprovalPolicy::Untrusted);
        assert_eq!(default.sandbox, SandboxMode::WorkspaceWrite);

        let read_only = HubConfig::derive(PermissionMode::ReadOnly, None, CollaborationMode::Default, &o);
        assert_eq!(read_only.approval_policy, ApprovalPolicy::Never);
        assert_eq!(read_only.sandbox, SandboxMode::ReadOnly);

        let safe_yolo = HubConfig::derive(PermissionMode::SafeYolo, None, CollaborationMode::Default, &o);
        assert_eq!(safe_yolo.approval_policy, ApprovalPolicy::OnFailure);
        assert_eq!(safe_yolo.sandbox, SandboxMode::WorkspaceWrite);

        let yolo = HubConfig::derive(PermissionMode::Yolo, None, CollaborationMode::Default, &o);
        assert_eq!(yolo.approval_policy, ApprovalPolicy::OnFailure);
        assert_eq!(yolo.sandbox, SandboxMode::DangerFullAccess);
    }

    #[test]
    fn mode_hash_changes_with_model_but_not_formatting() {
        let a = TurnMode {
            permission_mode: PermissionMode::Default,
            model: Some("o3".into()),
            collaboration_mode: CollaborationMode::Default,
        };
        let b = TurnMode {
            model: Some("o4".into()),
            ..a.clone()
        };
        assert_ne!(ModeHash::compute(&a), ModeHash::compute(&b));

        let a2 = a.clone();
        assert_eq!(ModeHash::compute(&a), ModeHash::compute(&a2));
    }
}
