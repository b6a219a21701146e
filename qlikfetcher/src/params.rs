use serde::Deserialize;

use crate::error::{QlikFetcherError, Result};

fn validate_app_id(app_id: &str) -> Result<()> {
    if app_id.trim().is_empty() {
        return Err(QlikFetcherError::InvalidParam("app id must not be blank".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsParams {
    pub app_ids: Vec<String>,
}

impl SheetsParams {
    pub fn validate(&self) -> Result<()> {
        if self.app_ids.is_empty() {
            return Err(QlikFetcherError::InvalidParam(
                "app_ids must name at least one app".into(),
            ));
        }
        self.app_ids.iter().try_for_each(|id| validate_app_id(id))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MasterItemsParams {
    pub app_id: String,
}

impl MasterItemsParams {
    pub fn validate(&self) -> Result<()> {
        validate_app_id(&self.app_id)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FetcherParams {
    Sheets(SheetsParams),
    MasterItems(MasterItemsParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Sheets,
    MasterItems,
}

impl FetcherParams {
    pub fn mode(&self) -> FetchMode {
        match self {
            FetcherParams::Sheets(_) => FetchMode::Sheets,
            FetcherParams::MasterItems(_) => FetchMode::MasterItems,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            FetcherParams::Sheets(params) => params.validate(),
            FetcherParams::MasterItems(params) => params.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_modes() {
        let params: FetcherParams =
            serde_json::from_value(json!({"mode": "sheets", "app_ids": ["a", "b"]})).unwrap();
        assert_eq!(params.mode(), FetchMode::Sheets);
        assert!(params.validate().is_ok());

        let params: FetcherParams =
            serde_json::from_value(json!({"mode": "master_items", "app_id": "a"})).unwrap();
        assert_eq!(params.mode(), FetchMode::MasterItems);
    }

    #[test]
    fn rejects_empty_and_blank_app_ids() {
        let params: FetcherParams =
            serde_json::from_value(json!({"mode": "sheets", "app_ids": []})).unwrap();
        assert!(params.validate().is_err());

        let params: FetcherParams =
            serde_json::from_value(json!({"mode": "sheets", "app_ids": ["a", " "]})).unwrap();
        assert!(params.validate().is_err());
    }
}
