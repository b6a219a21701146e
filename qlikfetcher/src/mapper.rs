use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{QlikFetcherError, Result};
use crate::models::{EngineObject, MasterItem, MasterItemKind, Sheet};

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).map(str::to_string)
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            log::debug!("Ignoring unparseable engine timestamp '{}': {}", raw, err);
            None
        }
    }
}

/// Reads `result.qList` of a `GetObjects` reply.
pub fn objects_from_list(result: &Value) -> Result<Vec<EngineObject>> {
    let list = result
        .get("qList")
        .and_then(Value::as_array)
        .ok_or(QlikFetcherError::MissingField("qList"))?;

    list.iter()
        .map(|entry| {
            let id = str_at(entry, "/qInfo/qId").ok_or(QlikFetcherError::MissingField("qInfo.qId"))?;
            Ok(EngineObject {
                id: id.to_string(),
                object_type: str_at(entry, "/qInfo/qType").unwrap_or_default().to_string(),
                meta: entry.get("qMeta").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

pub fn sheet_from_object(object: &EngineObject) -> Sheet {
    let meta = &object.meta;
    Sheet {
        id: object.id.clone(),
        title: str_at(meta, "/title").unwrap_or_default().to_string(),
        description: non_empty(str_at(meta, "/description")),
        owner_id: non_empty(str_at(meta, "/owner/id")),
        owner_name: non_empty(str_at(meta, "/owner/name")),
        created_at: parse_timestamp(str_at(meta, "/createdDate")),
        modified_at: parse_timestamp(str_at(meta, "/modifiedDate")),
        published: meta.get("published").and_then(Value::as_bool).unwrap_or(false),
        approved: meta.get("approved").and_then(Value::as_bool).unwrap_or(false),
    }
}

/// Reads the `qItems` of a dimension or measure list layout.
pub fn master_items_from_layout(kind: MasterItemKind, result: &Value) -> Result<Vec<MasterItem>> {
    let (pointer, field) = match kind {
        MasterItemKind::Dimension => ("/qLayout/qDimensionList/qItems", "qDimensionList.qItems"),
        MasterItemKind::Measure => ("/qLayout/qMeasureList/qItems", "qMeasureList.qItems"),
    };
    let items = result
        .pointer(pointer)
        .and_then(Value::as_array)
        .ok_or(QlikFetcherError::MissingField(field))?;

    items
        .iter()
        .map(|item| {
            let id = str_at(item, "/qInfo/qId").ok_or(QlikFetcherError::MissingField("qInfo.qId"))?;
            let title = str_at(item, "/qMeta/title")
                .or_else(|| str_at(item, "/qData/title"))
                .unwrap_or_default();
            let tags = item
                .pointer("/qData/tags")
                .or_else(|| item.pointer("/qMeta/tags"))
                .and_then(Value::as_array)
                .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            Ok(MasterItem {
                id: id.to_string(),
                kind,
                title: title.to_string(),
                description: non_empty(str_at(item, "/qMeta/description")),
                tags,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn maps_sheet_metadata() {
        let objects = objects_from_list(&json!({
            "qList": [{
                "qInfo": {"qId": "a1b2", "qType": "sheet"},
                "qMeta": {
                    "title": "Overview",
                    "description": "",
                    "createdDate": "2019-05-14T18:55:25.459Z",
                    "modifiedDate": "not a date",
                    "published": true,
                    "owner": {"id": "u1", "name": "Jane Analyst"}
                },
                "qData": {}
            }]
        }))
        .unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].object_type, "sheet");

        let sheet = sheet_from_object(&objects[0]);
        assert_eq!(sheet.id, "a1b2");
        assert_eq!(sheet.title, "Overview");
        assert_eq!(sheet.description, None);
        assert_eq!(sheet.owner_name.as_deref(), Some("Jane Analyst"));
        assert_eq!(
            sheet.created_at,
            Some(Utc.with_ymd_and_hms(2019, 5, 14, 18, 55, 25).unwrap()
                + chrono::Duration::milliseconds(459))
        );
        assert_eq!(sheet.modified_at, None);
        assert!(sheet.published);
        assert!(!sheet.approved);
    }

    #[test]
    fn missing_list_is_an_error() {
        assert!(matches!(
            objects_from_list(&json!({})),
            Err(QlikFetcherError::MissingField("qList"))
        ));
    }

    #[test]
    fn maps_measure_list_items() {
        let items = master_items_from_layout(
            MasterItemKind::Measure,
            &json!({
                "qLayout": {
                    "qMeasureList": {
                        "qItems": [{
                            "qInfo": {"qId": "m1", "qType": "measure"},
                            "qMeta": {"title": "Revenue", "description": "Sum of sales"},
                            "qData": {"title": "Revenue", "tags": ["finance", "kpi"]}
                        }]
                    }
                }
            }),
        )
        .unwrap();

        assert_eq!(
            items,
            vec![MasterItem {
                id: "m1".into(),
                kind: MasterItemKind::Measure,
                title: "Revenue".into(),
                description: Some("Sum of sales".into()),
                tags: vec!["finance".into(), "kpi".into()],
            }]
        );
    }

    #[test]
    fn dimension_layout_must_match_kind() {
        let layout = json!({"qLayout": {"qMeasureList": {"qItems": []}}});
        assert!(master_items_from_layout(MasterItemKind::Dimension, &layout).is_err());
    }
}
