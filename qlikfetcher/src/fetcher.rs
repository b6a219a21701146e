use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::json;

use crate::{
    client::{EngineApiService, EngineService},
    config::EngineConfig,
    error::{QlikFetcherError, Result},
    models::{AppSheets, MasterItems},
    params::{FetcherParams, MasterItemsParams, SheetsParams},
};

#[derive(Debug, Clone, Serialize)]
pub struct FetcherCapability {
    pub name: &'static str,
    pub description: &'static str,
    pub param_schema: serde_json::Value,
    pub examples: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchResponse {
    Sheets { apps: Vec<AppSheets> },
    MasterItems { app_id: String, items: MasterItems },
}

pub struct QlikFetcher {
    client: Arc<dyn EngineService>,
}

impl QlikFetcher {
    pub fn new(client: Arc<dyn EngineService>) -> Self {
        Self { client }
    }

    pub fn with_default_client(config: EngineConfig) -> Self {
        Self {
            client: Arc::new(EngineApiService::new(config)),
        }
    }

    pub fn name(&self) -> &'static str {
        "qlikfetcher"
    }

    pub fn capability(&self) -> FetcherCapability {
        FetcherCapability {
            name: self.name(),
            description: "Fetches sheets and master items from Qlik Sense apps via the Engine API",
            param_schema: json!({
                "type": "object",
                "required": ["mode"],
                "properties": {
                    "mode": { "enum": ["sheets", "master_items"] },
                    "app_ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "Apps whose sheets are fetched, one Engine API session each"
                    },
                    "app_id": { "type": "string", "description": "App whose master items are fetched" }
                },
                "oneOf": [
                    { "required": ["app_ids"] },
                    { "required": ["app_id"] }
                ]
            }),
            examples: vec![
                json!({"mode": "sheets", "app_ids": ["0c7b3f0e-5d1a-4b8e-9a41-4c4d2b1e7f11"]}),
                json!({"mode": "master_items", "app_id": "0c7b3f0e-5d1a-4b8e-9a41-4c4d2b1e7f11"}),
            ],
        }
    }

    fn parse_params(value: serde_json::Value) -> Result<FetcherParams> {
        let params = serde_json::from_value::<FetcherParams>(value)
            .map_err(|err| QlikFetcherError::InvalidParam(format!("invalid fetch params: {err}")))?;
        params.validate()?;
        Ok(params)
    }

    async fn fetch_sheets(&self, params: SheetsParams) -> Result<FetchResponse> {
        let sessions = params.app_ids.iter().map(|app_id| {
            let client = Arc::clone(&self.client);
            async move {
                let sheets = client.fetch_sheets(app_id).await?;
                Ok::<_, QlikFetcherError>(AppSheets {
                    app_id: app_id.clone(),
                    sheets,
                })
            }
        });
        let apps = try_join_all(sessions).await?;
        Ok(FetchResponse::Sheets { apps })
    }

    async fn fetch_master_items(&self, params: MasterItemsParams) -> Result<FetchResponse> {
        let items = self.client.fetch_master_items(&params.app_id).await?;
        Ok(FetchResponse::MasterItems {
            app_id: params.app_id,
            items,
        })
    }

    pub async fn fetch(&self, params: serde_json::Value) -> Result<FetchResponse> {
        let params = Self::parse_params(params)?;
        log::debug!("qlikfetcher fetch in {:?} mode", params.mode());
        match params {
            FetcherParams::Sheets(params) => self.fetch_sheets(params).await,
            FetcherParams::MasterItems(params) => self.fetch_master_items(params).await,
        }
    }
}
