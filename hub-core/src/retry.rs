//! Version-conflict retry helper (supplemented feature): the store's
//! `(metadata_version, agent_state_version)` invariant implies a
//! caller-visible conflict result every real caller needs to retry on,
//! mirroring the "retry with the returned current value" idiom the
//! rollout/conversation-manager code follows for store writes.

use std::future::Future;

use hub_protocol::store::UpdateOutcome;

const MAX_ATTEMPTS: usize = 5;

/// Calls `attempt(expected_version)` until it stops reporting
/// `VersionMismatch`, a hard error occurs, or `MAX_ATTEMPTS` is exhausted.
/// On a mismatch, the next attempt uses the version the store reported as
/// current rather than the caller's stale one.
pub async fn retry_on_version_mismatch<T, F, Fut>(
    mut expected_version: u64,
    mut attempt: F,
) -> anyhow::Result<UpdateOutcome<T>>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = anyhow::Result<UpdateOutcome<T>>>,
{
    for _ in 0..MAX_ATTEMPTS {
        match attempt(expected_version).await? {
            UpdateOutcome::VersionMismatch { version, .. } => {
                expected_version = version;
                continue;
            }
            other => return Ok(other),
        }
    }
    attempt(expected_version).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn succeeds_immediately_when_versions_already_match() {
        let calls = AtomicU64::new(0);
        let result = retry_on_version_mismatch(3, |version| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(version, 3);
                Ok(UpdateOutcome::Success { version: 4, value: "ok" })
            }
        })
        .await
        .unwrap();
        assert_eq!(result, UpdateOutcome::Success { version: 4, value: "ok" });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_with_reported_current_version_then_succeeds() {
        let current = std::sync::Arc::new(AtomicU64::new(7));
        let current_for_attempt = current.clone();
        let result = retry_on_version_mismatch(1, move |version| {
            let current = current_for_attempt.clone();
            async move {
                if version == current.load(Ordering::SeqCst) {
                    Ok(UpdateOutcome::Success { version: version + 1, value: "ok" })
                } else {
                    Ok(UpdateOutcome::VersionMismatch {
                        version: current.load(Ordering::SeqCst),
                        value: "stale",
                    })
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, UpdateOutcome::Success { version: 8, value: "ok" });
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_of_persistent_mismatch() {
        let result = retry_on_version_mismatch(0, |version| async move {
            Ok::<_, anyhow::Error>(UpdateOutcome::VersionMismatch {
                version: version + 1,
                value: "stale",
            })
        })
        .await
        .unwrap();
        assert!(matches!(result, UpdateOutcome::VersionMismatch { .. }));
    }
}
