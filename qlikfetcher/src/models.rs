use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// An entry of a `GetObjects` reply, before mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineObject {
    pub id: String,
    pub object_type: String,
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sheet {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub published: bool,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppSheets {
    pub app_id: String,
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterItemKind {
    Dimension,
    Measure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterItem {
    pub id: String,
    pub kind: MasterItemKind,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MasterItems {
    pub dimensions: Vec<MasterItem>,
    pub measures: Vec<MasterItem>,
}

impl MasterItems {
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.measures.is_empty()
    }
}
