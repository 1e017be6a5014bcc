//! The bridge endpoint: accepts a companion's long-lived POST and runs the
//! duplex stream for its lifetime.

use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nodescope_core::{BridgeError, Handshake, JsonStreamDecoder, NodeResponse};

use crate::bridge::transport::{BodyTransport, RequestTransport};
use crate::bridge::writer::run_node_writer;
use crate::config::ServerConfig;
use crate::metrics::{
    BRIDGE_CONNECTIONS_TOTAL, BRIDGE_DISCONNECTIONS_TOTAL, BRIDGE_MALFORMED_RESPONSES_TOTAL,
    BRIDGE_UNKNOWN_RESPONSES_TOTAL,
};
use crate::node::NodeSession;
use crate::registry::SessionRegistry;
use crate::server::AppState;

/// Buffered outbound frames before writers back-pressure.
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// `POST /support/{pin}` — the companion bridge.
///
/// Decodes the handshake before producing a response, so a malformed
/// handshake yields HTTP 400. On success the 200 response carries an
/// unbounded stream of request objects; the request body is consumed
/// concurrently as the response stream.
pub async fn bridge_handler(
    State(state): State<AppState>,
    Path(pin): Path<String>,
    request: Request,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map_or_else(|| "unknown".to_owned(), |info| info.0.to_string());

    let inbound = request.into_body().into_data_stream();
    match run_bridge(state.registry, state.config, pin, remote_addr, inbound).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "rejecting companion connection");
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}

/// Run the bridge protocol over an already-extracted body stream.
///
/// Split out of the HTTP handler so tests can drive a full duplex
/// conversation over in-memory channels.
pub async fn run_bridge<S, E>(
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
    pin: String,
    remote_addr: String,
    mut inbound: S,
) -> Result<Body, BridgeError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let mut decoder = JsonStreamDecoder::new();
    let handshake = read_handshake(&mut inbound, &mut decoder, config.max_frame_bytes).await?;

    if handshake.nodes.iter().any(|n| n.id.is_empty()) {
        return Err(BridgeError::BadRequest {
            message: "handshake declares a node with an empty id".into(),
        });
    }

    // The path PIN is just another declared session.
    let mut sessions = handshake.sessions.clone();
    if !sessions.contains(&pin) {
        sessions.push(pin);
    }

    let node_ids: Vec<String> = handshake.nodes.iter().map(|n| n.id.clone()).collect();
    for declared in &sessions {
        if !registry.attach(declared, &node_ids) {
            debug!(pin = %declared, "companion declared an unknown session");
        }
    }

    let token = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(OUTBOUND_CHANNEL_CAPACITY);
    let transport: Arc<dyn RequestTransport> = Arc::new(BodyTransport::new(outbound_tx));

    let mut nodes: Vec<ConnectedNode> = Vec::with_capacity(handshake.nodes.len());
    for node_info in &handshake.nodes {
        let node = registry.find_or_create_node(node_info)?;
        node.attach_sessions(&sessions);
        let generation = node.connect(&remote_addr, token.clone()).await;
        let writer = tokio::spawn(run_node_writer(
            node.clone(),
            transport.clone(),
            config.write_retry_limit,
            token.clone(),
        ));
        nodes.push(ConnectedNode {
            node,
            generation,
            writer,
        });
    }

    counter!(BRIDGE_CONNECTIONS_TOTAL).increment(1);
    info!(
        remote = %remote_addr,
        version = handshake.version,
        nodes = nodes.len(),
        "companion connected"
    );

    // Reader + teardown. Rooted in the connection token: ends when the body
    // ends, the peer closes, or a superseding connection cancels us.
    tokio::spawn(async move {
        run_reader(&nodes, &mut inbound, decoder, config.max_frame_bytes, &token).await;
        token.cancel();
        for connected in nodes {
            connected.writer.abort();
            let _ = connected.writer.await;
            connected.node.disconnect(connected.generation).await;
        }
        counter!(BRIDGE_DISCONNECTIONS_TOTAL).increment(1);
        info!(remote = %remote_addr, "companion disconnected");
    });

    Ok(Body::from_stream(
        ReceiverStream::new(outbound_rx).map(Ok::<_, Infallible>),
    ))
}

struct ConnectedNode {
    node: Arc<NodeSession>,
    generation: u64,
    writer: JoinHandle<()>,
}

/// Decode the first JSON object on the stream as the handshake.
async fn read_handshake<S, E>(
    inbound: &mut S,
    decoder: &mut JsonStreamDecoder,
    max_frame_bytes: usize,
) -> Result<Handshake, BridgeError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    loop {
        match decoder.next::<Handshake>() {
            Ok(Some(handshake)) => return Ok(handshake),
            Ok(None) => {}
            Err(err) => {
                return Err(BridgeError::BadRequest {
                    message: format!("malformed handshake: {err}"),
                })
            }
        }
        if decoder.buffered() > max_frame_bytes {
            return Err(BridgeError::BadRequest {
                message: "handshake exceeds frame size limit".into(),
            });
        }
        match inbound.next().await {
            Some(Ok(bytes)) => decoder.extend(&bytes),
            Some(Err(err)) => {
                return Err(BridgeError::BadRequest {
                    message: format!("stream error before handshake: {err}"),
                })
            }
            None => {
                return Err(BridgeError::BadRequest {
                    message: "stream ended before handshake".into(),
                })
            }
        }
    }
}

/// Decode companion responses and route each to the owning node session.
///
/// Malformed objects and unknown ids are counted and skipped; neither tears
/// the connection down. Returns when the body ends, errors, the buffered
/// frame limit is breached, or the token is cancelled.
async fn run_reader<S, E>(
    nodes: &[ConnectedNode],
    inbound: &mut S,
    mut decoder: JsonStreamDecoder,
    max_frame_bytes: usize,
    token: &CancellationToken,
) where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    loop {
        loop {
            match decoder.next::<NodeResponse>() {
                Ok(Some(response)) => route_response(nodes, response).await,
                Ok(None) => break,
                Err(err) => {
                    counter!(BRIDGE_MALFORMED_RESPONSES_TOTAL).increment(1);
                    warn!(error = %err, "skipping malformed response object");
                }
            }
        }
        if decoder.buffered() > max_frame_bytes {
            warn!(
                buffered = decoder.buffered(),
                "response object exceeds frame size limit, closing connection"
            );
            return;
        }

        let chunk = tokio::select! {
            () = token.cancelled() => return,
            chunk = inbound.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => decoder.extend(&bytes),
            Some(Err(err)) => {
                debug!(error = %err, "companion stream error");
                return;
            }
            None => return,
        }
    }
}

/// Hand one response to whichever connected node has the request in flight.
async fn route_response(nodes: &[ConnectedNode], response: NodeResponse) {
    for connected in nodes {
        if connected.node.correlator().contains(&response.id) {
            let _ = connected.node.deliver(response).await;
            return;
        }
    }
    // Cancelled, already terminated, or companion/server drift.
    counter!(BRIDGE_UNKNOWN_RESPONSES_TOTAL).increment(1);
    debug!(request_id = %response.id, "response for unknown request id");
}
