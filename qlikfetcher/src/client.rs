use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::engine::EngineSession;
use crate::error::Result;
use crate::flows::{MasterItemsFlow, ObjectsFlow};
use crate::mapper;
use crate::models::{MasterItems, Sheet};

/// The Engine API calls the fetcher relies on.
#[async_trait]
pub trait EngineService: Send + Sync {
    async fn fetch_sheets(&self, app_id: &str) -> Result<Vec<Sheet>>;

    async fn fetch_master_items(&self, app_id: &str) -> Result<MasterItems>;
}

/// [`EngineService`] backed by live websocket sessions, one per call.
pub struct EngineApiService {
    session: EngineSession,
}

impl EngineApiService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            session: EngineSession::new(config),
        }
    }
}

#[async_trait]
impl EngineService for EngineApiService {
    async fn fetch_sheets(&self, app_id: &str) -> Result<Vec<Sheet>> {
        let objects = self.session.run(app_id, ObjectsFlow::sheets(app_id)).await?;
        let sheets: Vec<Sheet> = objects.iter().map(mapper::sheet_from_object).collect();
        log::info!("Fetched {} sheets for app {}", sheets.len(), app_id);
        Ok(sheets)
    }

    async fn fetch_master_items(&self, app_id: &str) -> Result<MasterItems> {
        let items = self.session.run(app_id, MasterItemsFlow::new(app_id)).await?;
        if items.is_empty() {
            log::info!("No master items fetched for app {}", app_id);
        } else {
            log::info!(
                "Fetched {} master dimensions and {} master measures for app {}",
                items.dimensions.len(),
                items.measures.len(),
                app_id
            );
        }
        Ok(items)
    }
}
