//! Process-wide application session registry.

use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{AppConfig, AppId, ApplicationSession};

/// What happens to an application session once its last client unmounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep the session (and its configuration) for the life of the server
    #[default]
    Retain,
    /// Remove the session when no client remains mounted
    WhenIdle,
}

/// Registry of application sessions keyed by app id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    apps: DashMap<AppId, Arc<ApplicationSession>>,
    policy: EvictionPolicy,
}

impl SessionRegistry {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            apps: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up `app_id`, creating its session from `config` if absent.
    ///
    /// Only the first creator's configuration is kept; later callers get the
    /// existing session regardless of what they pass.
    pub fn get_or_create(&self, app_id: AppId, config: &AppConfig) -> Arc<ApplicationSession> {
        self.entry_or_create(app_id, config).value().clone()
    }

    /// As [`get_or_create`](Self::get_or_create), also counting one active
    /// client against the session. Must be paired with [`release`](Self::release).
    pub fn acquire(&self, app_id: AppId, config: &AppConfig) -> Arc<ApplicationSession> {
        // The count is bumped while the shard lock is held so a concurrent
        // idle eviction cannot remove the session in between.
        let entry = self.entry_or_create(app_id, config);
        entry.acquire_client();
        entry.value().clone()
    }

    fn entry_or_create(
        &self,
        app_id: AppId,
        config: &AppConfig,
    ) -> RefMut<'_, AppId, Arc<ApplicationSession>> {
        self.apps.entry(app_id).or_insert_with(|| {
            tracing::info!("Creating application session app_id={}", app_id);
            Arc::new(ApplicationSession::new(app_id, config.clone()))
        })
    }

    /// Drop one active client from `app_id`, evicting per policy
    pub fn release(&self, app_id: AppId) {
        let Some(app) = self.get(app_id) else {
            tracing::warn!("release for unknown app_id={}", app_id);
            return;
        };
        let remaining = app.release_client();
        if remaining == 0 && self.policy == EvictionPolicy::WhenIdle {
            let removed = self
                .apps
                .remove_if(&app_id, |_, app| app.active_clients() == 0);
            if removed.is_some() {
                tracing::info!("Evicted idle application session app_id={}", app_id);
            }
        }
    }

    pub fn get(&self, app_id: AppId) -> Option<Arc<ApplicationSession>> {
        self.apps.get(&app_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn app_ids(&self) -> Vec<AppId> {
        self.apps.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of all sessions
    pub fn sessions(&self) -> Vec<Arc<ApplicationSession>> {
        self.apps.iter().map(|entry| entry.value().clone()).collect()
    }
}
