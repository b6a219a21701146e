use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::{generate_xrfkey, EngineConfig, XRFKEY_HEADER};
use crate::correlation::ReplyCorrelation;
use crate::error::{QlikFetcherError, Result};
use crate::flows::{EngineFlow, FlowContext};
use crate::protocol::{EngineMessage, EngineRequest};

/// Runs [`EngineFlow`]s against the Engine API of one Qlik Sense app.
///
/// Every call to [`run`](Self::run) opens its own websocket and its own
/// [`ReplyCorrelation`], so concurrent runs never share state.
#[derive(Debug, Clone)]
pub struct EngineSession {
    config: EngineConfig,
}

impl EngineSession {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Runs `flow` to completion within the configured deadline.
    ///
    /// A deadline overrun is not an error: it is logged and the flow's empty
    /// output is returned. Every other fault is propagated.
    pub async fn run<F: EngineFlow>(&self, app_id: &str, flow: F) -> Result<F::Output> {
        let name = flow.name();
        let tracker = ReplyCorrelation::new();
        let deadline = self.config.timeout();

        match tokio::time::timeout(deadline, self.exchange(app_id, flow, &tracker)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "Engine exchange '{}' for app {} timed out after {:?} (pending requests: {:?})",
                    name,
                    app_id,
                    deadline,
                    tracker.pending_ids()
                );
                Ok(F::Output::default())
            }
        }
    }

    async fn exchange<F: EngineFlow>(
        &self,
        app_id: &str,
        mut flow: F,
        tracker: &ReplyCorrelation,
    ) -> Result<F::Output> {
        let request = self.handshake_request(app_id)?;
        log::info!("Opening Engine API session for app {} ({})", app_id, request.uri());
        let (socket, _) = connect_async(request).await?;
        let (mut sink, mut stream) = socket.split();

        let transport = TransportEnd::default();
        let outcome = tokio::select! {
            sent = drive_flow(&mut sink, &mut flow, tracker, &transport) => sent,
            received = async {
                transport.finish(receive_replies(&mut stream, tracker).await);
                tracker.notify_reply_arrived();
                // From here on only the sender decides how the exchange ends.
                std::future::pending::<Result<()>>().await
            } => received,
        };

        if let Err(err) = sink.close().await {
            log::debug!("Closing Engine API session for app {} failed: {}", app_id, err);
        }
        outcome?;

        log::info!("Engine exchange '{}' for app {} completed", flow.name(), app_id);
        Ok(flow.into_output())
    }

    fn handshake_request(&self, app_id: &str) -> Result<Request> {
        let xrfkey = generate_xrfkey();
        let url = self.config.app_url(app_id, &xrfkey)?;
        let mut request = url.as_str().into_client_request()?;

        let headers = request.headers_mut();
        insert_header(headers, XRFKEY_HEADER, &xrfkey)?;
        for (name, value) in &self.config.headers {
            insert_header(headers, name, value)?;
        }
        Ok(request)
    }
}

/// How the receive side ended. Read by the sender once the buffered replies
/// are drained, so a transport fault after the final reply does not fail a
/// completed exchange.
#[derive(Default)]
struct TransportEnd {
    closed: AtomicBool,
    error: Mutex<Option<QlikFetcherError>>,
}

impl TransportEnd {
    fn finish(&self, outcome: Result<()>) {
        if let Err(err) = outcome {
            log::debug!("Engine transport ended with an error: {}", err);
            *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        }
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn take_error(&self) -> QlikFetcherError {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(QlikFetcherError::ConnectionClosed)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| QlikFetcherError::Http(format!("{name}: {err}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|err| QlikFetcherError::Http(format!("{name}: {err}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// Sender side: sends what the flow asks for and hands it every reply the
/// receiver buffered, until nothing is pending or buffered.
async fn drive_flow<F, S>(
    sink: &mut S,
    flow: &mut F,
    tracker: &ReplyCorrelation,
    transport: &TransportEnd,
) -> Result<()>
where
    F: EngineFlow,
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut next_id = 1;
    let mut outbox = flow.open(&mut FlowContext::new(tracker, &mut next_id))?;

    loop {
        send_requests(sink, tracker, std::mem::take(&mut outbox)).await?;

        if tracker.is_complete() {
            return Ok(());
        }
        if transport.is_closed() && tracker.list_unhandled().is_empty() {
            return Err(transport.take_error());
        }

        tracker.await_reply_arrival().await;
        tracker.clear_reply_notification();

        for reply in tracker.list_unhandled() {
            if let Some(err) = reply.clone().into_error() {
                log::warn!("Engine rejected request id {}: {}", reply.id, err);
                return Err(err);
            }
            let mut ctx = FlowContext::new(tracker, &mut next_id);
            match flow.on_reply(&reply, &mut ctx)? {
                Some(follow_ups) => outbox.extend(follow_ups),
                None => log::warn!("Discarding reply to unexpected request id {}", reply.id),
            }
            tracker.remove_unhandled(&reply)?;
        }
    }
}

/// Sends a batch, then records it as pending. Requests sharing a method are
/// recorded together.
async fn send_requests<S>(
    sink: &mut S,
    tracker: &ReplyCorrelation,
    requests: Vec<EngineRequest>,
) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    if requests.is_empty() {
        return Ok(());
    }

    let mut sent: BTreeMap<&'static str, Vec<u64>> = BTreeMap::new();
    for request in &requests {
        let frame = serde_json::to_string(request)?;
        log::debug!(
            "-> {} id={} handle={}",
            request.method,
            request.id,
            request.handle
        );
        sink.feed(Message::Text(frame.into())).await?;
        sent.entry(request.method).or_default().push(request.id);
    }
    sink.flush().await?;

    for (method, ids) in sent {
        match ids.as_slice() {
            [id] => tracker.record_pending(*id, method)?,
            ids => tracker.record_pending_many(ids, method)?,
        }
    }
    Ok(())
}

/// Receiver side: buffers correlated replies until the engine closes the socket.
async fn receive_replies<S>(stream: &mut S, tracker: &ReplyCorrelation) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                let message: EngineMessage = serde_json::from_str(text.as_str())?;
                if message.id.is_none() {
                    log::debug!(
                        "Engine notification {}: {}",
                        message.method.as_deref().unwrap_or("<unnamed>"),
                        message.params.unwrap_or_default()
                    );
                    continue;
                }
                if let Some(reply) = message.into_reply() {
                    log::debug!("<- reply id={}", reply.id);
                    tracker.add_unhandled(reply);
                    tracker.notify_reply_arrived();
                }
            }
            Message::Close(frame) => {
                log::debug!("Engine closed the session: {:?}", frame);
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
