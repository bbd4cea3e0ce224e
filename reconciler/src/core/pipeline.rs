//! Pipeline record as seen by the reconciler.

use super::PipelineStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment and secrets captured when the pipeline was triggered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// Plain environment variables.
    #[serde(default)]
    pub envs: HashMap<String, String>,
    /// User secrets.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Platform secrets, which win over user secrets.
    #[serde(default)]
    pub platform_secrets: HashMap<String, String>,
}

/// One workflow execution. Owned by the pipeline service; read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline id.
    pub id: u64,
    /// Cluster the pipeline runs on.
    pub cluster_name: String,
    /// Current status.
    pub status: PipelineStatus,
    /// When the pipeline started.
    pub time_begin: Option<DateTime<Utc>>,
    /// When the pipeline ended.
    pub time_end: Option<DateTime<Utc>>,
    /// Arbitrary labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Trigger-time snapshot.
    #[serde(default)]
    pub snapshot: PipelineSnapshot,
}

impl Pipeline {
    /// Creates a running pipeline on the given cluster.
    #[must_use]
    pub fn new(id: u64, cluster_name: impl Into<String>) -> Self {
        Self {
            id,
            cluster_name: cluster_name.into(),
            status: PipelineStatus::Running,
            time_begin: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: PipelineStatus) -> Self {
        self.status = status;
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the trigger-time snapshot.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: PipelineSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Merges user and platform secrets; platform secrets win.
    #[must_use]
    pub fn all_secrets(&self) -> HashMap<String, String> {
        let mut all = self.snapshot.secrets.clone();
        all.extend(
            self.snapshot
                .platform_secrets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_secrets_win() {
        let mut snapshot = PipelineSnapshot::default();
        snapshot.secrets.insert("TOKEN".into(), "user".into());
        snapshot.secrets.insert("ONLY_USER".into(), "u".into());
        snapshot.platform_secrets.insert("TOKEN".into(), "platform".into());

        let p = Pipeline::new(1, "local").with_snapshot(snapshot);
        let all = p.all_secrets();
        assert_eq!(all["TOKEN"], "platform");
        assert_eq!(all["ONLY_USER"], "u");
    }
}
