//! Request chains run over an Engine API session.
//!
//! A flow decides which requests to send and how to consume their replies;
//! [`EngineSession`](crate::engine::EngineSession) owns the transport and the
//! [`ReplyCorrelation`] tracker and feeds every correlated reply to the flow.

use std::collections::HashMap;

use serde_json::json;

use crate::correlation::ReplyCorrelation;
use crate::error::Result;
use crate::mapper;
use crate::models::{EngineObject, MasterItemKind, MasterItems};
use crate::protocol::{methods, EngineReply, EngineRequest, GLOBAL_HANDLE};

/// Handle key of the document opened by `OpenDoc`.
pub const DOC_HANDLE: &str = "doc";

pub struct FlowContext<'a> {
    tracker: &'a ReplyCorrelation,
    next_id: &'a mut u64,
}

impl<'a> FlowContext<'a> {
    pub fn new(tracker: &'a ReplyCorrelation, next_id: &'a mut u64) -> Self {
        Self { tracker, next_id }
    }

    pub fn tracker(&self) -> &ReplyCorrelation {
        self.tracker
    }

    /// Builds a request with the next session id.
    pub fn request(
        &mut self,
        handle: i64,
        method: &'static str,
        params: serde_json::Value,
    ) -> EngineRequest {
        let id = *self.next_id;
        *self.next_id += 1;
        EngineRequest::new(id, handle, method, params)
    }
}

pub trait EngineFlow: Send {
    /// Accumulated result. `Default` is what a timed-out exchange yields.
    type Output: Default + Send;

    fn name(&self) -> &'static str;

    /// Requests sent as soon as the connection is open.
    fn open(&mut self, ctx: &mut FlowContext<'_>) -> Result<Vec<EngineRequest>>;

    /// Consumes a reply addressed to this flow and returns follow-up requests,
    /// or `None` when the reply is not one the flow is waiting for. A consumed
    /// reply must be cleared from the pending set.
    fn on_reply(
        &mut self,
        reply: &EngineReply,
        ctx: &mut FlowContext<'_>,
    ) -> Result<Option<Vec<EngineRequest>>>;

    fn into_output(self) -> Self::Output;
}

fn open_doc_request(ctx: &mut FlowContext<'_>, app_id: &str) -> EngineRequest {
    ctx.request(
        GLOBAL_HANDLE,
        methods::OPEN_DOC,
        json!({ "qDocName": app_id, "qNoData": true }),
    )
}

/// Stores the document handle if `reply` answers the pending `OpenDoc`.
fn accept_open_doc(reply: &EngineReply, ctx: &FlowContext<'_>) -> Result<Option<i64>> {
    let tracker = ctx.tracker();
    if !tracker.is_pending(reply.id, methods::OPEN_DOC) {
        return Ok(None);
    }
    let handle = reply.return_handle()?;
    tracker.set_handle(DOC_HANDLE, handle);
    tracker.clear_pending(reply.id)?;
    log::debug!("Document opened with handle {}", handle);
    Ok(Some(handle))
}

/// OpenDoc, then GetObjects for the configured object types.
pub struct ObjectsFlow {
    app_id: String,
    types: Vec<String>,
    objects: Vec<EngineObject>,
}

impl ObjectsFlow {
    pub fn new(app_id: impl Into<String>, types: Vec<String>) -> Self {
        Self {
            app_id: app_id.into(),
            types,
            objects: Vec::new(),
        }
    }

    pub fn sheets(app_id: impl Into<String>) -> Self {
        Self::new(app_id, vec!["sheet".to_string()])
    }
}

impl EngineFlow for ObjectsFlow {
    type Output = Vec<EngineObject>;

    fn name(&self) -> &'static str {
        "objects"
    }

    fn open(&mut self, ctx: &mut FlowContext<'_>) -> Result<Vec<EngineRequest>> {
        Ok(vec![open_doc_request(ctx, &self.app_id)])
    }

    fn on_reply(
        &mut self,
        reply: &EngineReply,
        ctx: &mut FlowContext<'_>,
    ) -> Result<Option<Vec<EngineRequest>>> {
        if accept_open_doc(reply, ctx)?.is_some() {
            let doc = ctx.tracker().get_handle(DOC_HANDLE)?;
            let request = ctx.request(
                doc,
                methods::GET_OBJECTS,
                json!({
                    "qOptions": {
                        "qTypes": self.types,
                        "qIncludeSessionObjects": false,
                        "qData": {}
                    }
                }),
            );
            return Ok(Some(vec![request]));
        }

        if ctx.tracker().is_pending(reply.id, methods::GET_OBJECTS) {
            self.objects.extend(mapper::objects_from_list(&reply.result)?);
            ctx.tracker().clear_pending(reply.id)?;
            return Ok(Some(Vec::new()));
        }

        Ok(None)
    }

    fn into_output(self) -> Self::Output {
        self.objects
    }
}

fn list_handle_key(kind: MasterItemKind) -> &'static str {
    match kind {
        MasterItemKind::Dimension => "dimension_list",
        MasterItemKind::Measure => "measure_list",
    }
}

fn list_definition(kind: MasterItemKind) -> serde_json::Value {
    let data = json!({ "title": "/title", "tags": "/tags" });
    match kind {
        MasterItemKind::Dimension => json!({
            "qProp": {
                "qInfo": { "qType": "DimensionList" },
                "qDimensionListDef": { "qType": "dimension", "qData": data }
            }
        }),
        MasterItemKind::Measure => json!({
            "qProp": {
                "qInfo": { "qType": "MeasureList" },
                "qMeasureListDef": { "qType": "measure", "qData": data }
            }
        }),
    }
}

/// OpenDoc, then one session list object per master item kind, then the
/// layout of each list.
pub struct MasterItemsFlow {
    app_id: String,
    kinds: HashMap<u64, MasterItemKind>,
    items: MasterItems,
}

impl MasterItemsFlow {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            kinds: HashMap::new(),
            items: MasterItems::default(),
        }
    }

    fn kind_of(&self, id: u64) -> Option<MasterItemKind> {
        self.kinds.get(&id).copied()
    }
}

impl EngineFlow for MasterItemsFlow {
    type Output = MasterItems;

    fn name(&self) -> &'static str {
        "master_items"
    }

    fn open(&mut self, ctx: &mut FlowContext<'_>) -> Result<Vec<EngineRequest>> {
        Ok(vec![open_doc_request(ctx, &self.app_id)])
    }

    fn on_reply(
        &mut self,
        reply: &EngineReply,
        ctx: &mut FlowContext<'_>,
    ) -> Result<Option<Vec<EngineRequest>>> {
        if let Some(doc) = accept_open_doc(reply, ctx)? {
            let mut requests = Vec::with_capacity(2);
            for kind in [MasterItemKind::Dimension, MasterItemKind::Measure] {
                let request =
                    ctx.request(doc, methods::CREATE_SESSION_OBJECT, list_definition(kind));
                self.kinds.insert(request.id, kind);
                requests.push(request);
            }
            return Ok(Some(requests));
        }

        let Some(kind) = self.kind_of(reply.id) else {
            return Ok(None);
        };

        if ctx.tracker().is_pending(reply.id, methods::CREATE_SESSION_OBJECT) {
            let key = list_handle_key(kind);
            ctx.tracker().set_handle(key, reply.return_handle()?);
            ctx.tracker().clear_pending(reply.id)?;

            let handle = ctx.tracker().get_handle(key)?;
            let request = ctx.request(handle, methods::GET_LAYOUT, json!({}));
            self.kinds.insert(request.id, kind);
            return Ok(Some(vec![request]));
        }

        if ctx.tracker().is_pending(reply.id, methods::GET_LAYOUT) {
            let items = mapper::master_items_from_layout(kind, &reply.result)?;
            match kind {
                MasterItemKind::Dimension => self.items.dimensions.extend(items),
                MasterItemKind::Measure => self.items.measures.extend(items),
            }
            ctx.tracker().clear_pending(reply.id)?;
            return Ok(Some(Vec::new()));
        }

        Ok(None)
    }

    fn into_output(self) -> Self::Output {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(id: u64, result: serde_json::Value) -> EngineReply {
        EngineReply {
            id,
            result,
            error: None,
        }
    }

    fn record(tracker: &ReplyCorrelation, requests: &[EngineRequest]) {
        for request in requests {
            tracker.record_pending(request.id, request.method).unwrap();
        }
    }

    #[test]
    fn objects_flow_chains_get_objects_on_doc_handle() {
        let tracker = ReplyCorrelation::new();
        let mut next_id = 1;
        let mut flow = ObjectsFlow::sheets("app-1");

        let mut ctx = FlowContext::new(&tracker, &mut next_id);
        let opening = flow.open(&mut ctx).unwrap();
        assert_eq!(opening.len(), 1);
        assert_eq!(opening[0].id, 1);
        assert_eq!(opening[0].handle, GLOBAL_HANDLE);
        record(&tracker, &opening);

        let follow_ups = flow
            .on_reply(&reply(1, json!({"qReturn": {"qHandle": 7}})), &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].id, 2);
        assert_eq!(follow_ups[0].handle, 7);
        assert_eq!(follow_ups[0].method, methods::GET_OBJECTS);
        assert_eq!(follow_ups[0].params["qOptions"]["qTypes"], json!(["sheet"]));
        assert!(tracker.is_method(1, methods::OPEN_DOC));
        assert!(!tracker.is_pending(1, methods::OPEN_DOC));
        record(&tracker, &follow_ups);

        let done = flow
            .on_reply(
                &reply(2, json!({"qList": [{"qInfo": {"qId": "s1", "qType": "sheet"}}]})),
                &mut ctx,
            )
            .unwrap()
            .unwrap();
        assert!(done.is_empty());
        assert!(tracker.is_complete());
        assert_eq!(flow.into_output()[0].id, "s1");
    }

    #[test]
    fn objects_flow_ignores_foreign_replies() {
        let tracker = ReplyCorrelation::new();
        let mut next_id = 1;
        let mut flow = ObjectsFlow::sheets("app-1");
        let mut ctx = FlowContext::new(&tracker, &mut next_id);
        let opening = flow.open(&mut ctx).unwrap();
        record(&tracker, &opening);

        assert!(flow.on_reply(&reply(99, json!({})), &mut ctx).unwrap().is_none());
        assert!(tracker.is_pending(1, methods::OPEN_DOC));
    }

    #[test]
    fn master_items_flow_fans_out_list_objects() {
        let tracker = ReplyCorrelation::new();
        let mut next_id = 10;
        let mut flow = MasterItemsFlow::new("app-2");
        let mut ctx = FlowContext::new(&tracker, &mut next_id);

        let opening = flow.open(&mut ctx).unwrap();
        record(&tracker, &opening);
        let lists = flow
            .on_reply(&reply(10, json!({"qReturn": {"qHandle": 1}})), &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(lists.len(), 2);
        assert!(lists
            .iter()
            .all(|r| r.method == methods::CREATE_SESSION_OBJECT && r.handle == 1));
        record(&tracker, &lists);

        // Measure list answered first.
        let layout = flow
            .on_reply(&reply(12, json!({"qReturn": {"qHandle": 3}})), &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(layout[0].handle, 3);
        assert_eq!(layout[0].method, methods::GET_LAYOUT);
        assert_eq!(tracker.get_handle("measure_list"), Ok(3));
        assert!(tracker.get_handle("dimension_list").is_err());
        record(&tracker, &layout);

        assert!(!tracker.is_complete());
        assert_eq!(tracker.pending_ids(), vec![11, 13]);
    }
}
