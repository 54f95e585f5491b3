//! Scale-in protection: tells the orchestrator not to evict this task while
//! it's mid-OCR-job. Self-disables for the rest of the process lifetime on
//! any API failure, so a broken control plane never blocks OCR throughput.

use std::sync::atomic::{AtomicBool, Ordering};

use aws_sdk_ecs::Client as EcsClient;

use crate::prelude::*;

const METADATA_URI_ENV: &str = "ECS_CONTAINER_METADATA_URI_V4";

pub struct ScaleInProtection {
    ecs: EcsClient,
    enabled: AtomicBool,
    protection_minutes: u32,
}

impl ScaleInProtection {
    pub fn new(ecs: EcsClient, enabled: bool, protection_minutes: u32) -> Self {
        Self {
            ecs,
            enabled: AtomicBool::new(enabled),
            protection_minutes,
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// The task ARN of the current task, discovered from the ECS metadata
    /// endpoint. `None` when not running under ECS (the metadata env var
    /// is unset), in which case protection is a no-op.
    async fn current_task_arn(&self) -> Option<String> {
        let base_uri = std::env::var(METADATA_URI_ENV).ok()?;
        let url = format!("{base_uri}/task");
        let response = reqwest::get(&url).await.ok()?;
        let body: serde_json::Value = response.json().await.ok()?;
        body.get("TaskARN")
            .and_then(|v| v.as_str())
            .map(|s| s.to_owned())
    }

    /// Enable protection for the configured window, if running under ECS
    /// and protection hasn't already self-disabled.
    pub async fn enable(&self) {
        if !self.is_enabled() {
            return;
        }
        let Some(task_arn) = self.current_task_arn().await else {
            return;
        };

        let result = self
            .ecs
            .update_task_protection()
            .tasks(&task_arn)
            .protection_enabled(true)
            .expires_in_minutes(self.protection_minutes as i32)
            .send()
            .await;

        if let Err(err) = result {
            warn!("failed to enable scale-in protection, disabling for process lifetime: {err}");
            self.disable();
        }
    }

    /// Disable protection in the `finally` phase of message processing.
    pub async fn disable_for_task(&self) {
        if !self.is_enabled() {
            return;
        }
        let Some(task_arn) = self.current_task_arn().await else {
            return;
        };

        let result = self
            .ecs
            .update_task_protection()
            .tasks(&task_arn)
            .protection_enabled(false)
            .send()
            .await;

        if let Err(err) = result {
            warn!("failed to disable scale-in protection, disabling feature: {err}");
            self.disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_is_sticky() {
        let flag = AtomicBool::new(true);
        flag.store(false, Ordering::Relaxed);
        assert!(!flag.load(Ordering::Relaxed));
    }
}
