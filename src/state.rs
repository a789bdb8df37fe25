use std::sync::Arc;

use crate::auth::services::ensure_default_admin;
use crate::config::AppConfig;
use crate::storage::ids::SteppingClock;
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Storage,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let storage = Storage::connect(&config.storage).await?;
        ensure_default_admin(&storage, &config.admin).await?;
        Ok(Self { config, storage })
    }

    /// In-memory storage, deterministic clock, no default admin.
    pub fn fake() -> Self {
        let clock = SteppingClock::new(time::OffsetDateTime::UNIX_EPOCH + time::Duration::days(19_723));
        Self {
            config: Arc::new(AppConfig::for_tests()),
            storage: Storage::memory(Arc::new(clock)),
        }
    }
}
