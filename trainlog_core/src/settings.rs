//! Per-engine user settings with an injected loader.
//!
//! Settings are owned by the engine instance instead of living in a
//! process-wide cache, so two engines (or two tests) never share state.

use crate::lock;
use crate::service::{ServiceResult, WorkoutService};
use crate::{RestSettings, UserId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Boxed future returned by a settings loader
pub type LoaderFuture = Pin<Box<dyn Future<Output = ServiceResult<RestSettings>> + Send>>;

/// Function that fetches a user's rest-interval settings
pub type SettingsLoader = Arc<dyn Fn(UserId) -> LoaderFuture + Send + Sync>;

/// Build a loader that asks the persistence service
pub fn service_loader(service: Arc<dyn WorkoutService>) -> SettingsLoader {
    Arc::new(move |user_id: UserId| {
        let service = Arc::clone(&service);
        Box::pin(async move { service.rest_interval_settings(&user_id).await }) as LoaderFuture
    })
}

pub struct SettingsProvider {
    loader: SettingsLoader,
    fallback: RestSettings,
    cache: Mutex<HashMap<UserId, RestSettings>>,
}

impl SettingsProvider {
    /// `fallback` is used whenever the loader fails
    pub fn new(loader: SettingsLoader, fallback: RestSettings) -> Self {
        Self {
            loader,
            fallback,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Settings already loaded for `user_id`, without calling the loader
    pub fn cached(&self, user_id: &UserId) -> Option<RestSettings> {
        lock(&self.cache).get(user_id).copied()
    }

    /// Cached settings, loading them on first use
    pub async fn rest_settings(&self, user_id: &UserId) -> RestSettings {
        if let Some(settings) = self.cached(user_id) {
            return settings;
        }

        match (self.loader)(user_id.clone()).await {
            Ok(settings) => {
                lock(&self.cache).insert(user_id.clone(), settings);
                tracing::debug!("Loaded rest settings for {}: {:?}", user_id, settings);
                settings
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load rest settings for {}: {}. Using fallback.",
                    user_id,
                    e
                );
                self.fallback
            }
        }
    }
}
