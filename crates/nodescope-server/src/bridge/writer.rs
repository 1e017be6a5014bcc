//! Per-node writer task: dequeues pending requests and writes them to the
//! companion stream.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use nodescope_core::ErrorKind;

use crate::bridge::transport::RequestTransport;
use crate::metrics::{BRIDGE_REQUESTS_SENT_TOTAL, BRIDGE_WRITE_RETRIES_TOTAL};
use crate::node::NodeSession;

/// Drain the node's request queue onto the transport until cancelled.
///
/// Holds the queue-receiver lock for the lifetime of the connection, so a
/// superseding connection's writer blocks until this one has been cancelled.
/// Each request is recorded in the correlator before the write; a failed
/// write removes it again and either re-enqueues (retry counter below the
/// limit) or terminates the waiter with `send-failed`.
pub async fn run_node_writer(
    node: Arc<NodeSession>,
    transport: Arc<dyn RequestTransport>,
    retry_limit: u32,
    token: CancellationToken,
) {
    let mut queue = tokio::select! {
        () = token.cancelled() => return,
        guard = node.queue_receiver().lock() => guard,
    };

    loop {
        let mut pending = tokio::select! {
            () = token.cancelled() => break,
            next = queue.recv() => match next {
                Some(pending) => pending,
                None => break,
            },
        };

        let frame = match serde_json::to_vec(&pending.request) {
            Ok(mut raw) => {
                raw.push(b'\n');
                Bytes::from(raw)
            }
            Err(err) => {
                warn!(node_id = %node.id(), error = %err, "failed to serialise request");
                pending
                    .fail(ErrorKind::Internal, format!("failed to serialise request: {err}"))
                    .await;
                continue;
            }
        };

        let request_id = pending.request.id.clone();
        let method = pending.request.method.clone();
        node.correlator().insert(request_id.clone(), pending.sink.clone());

        // The connection may have been superseded between dequeue and here;
        // the drain has already run, so terminate the waiter ourselves.
        if token.is_cancelled() {
            let _ = node.correlator().remove(&request_id);
            pending
                .fail(ErrorKind::Disconnected, "companion disconnected")
                .await;
            break;
        }

        debug!(node_id = %node.id(), request_id = %request_id, method = %method, "sending request");

        match transport.send(frame).await {
            Ok(()) => {
                counter!(BRIDGE_REQUESTS_SENT_TOTAL, "method" => method).increment(1);
            }
            Err(err) => {
                let _ = node.correlator().remove(&request_id);
                pending.retries += 1;
                counter!(BRIDGE_WRITE_RETRIES_TOTAL).increment(1);

                if pending.retries < retry_limit {
                    debug!(
                        node_id = %node.id(),
                        request_id = %request_id,
                        retries = pending.retries,
                        error = %err,
                        "write failed, re-enqueueing"
                    );
                    if let Err(rejected) = node.requeue(pending) {
                        rejected
                            .fail(
                                ErrorKind::SendFailed,
                                "request queue full while retrying failed write",
                            )
                            .await;
                    }
                } else {
                    warn!(
                        node_id = %node.id(),
                        request_id = %request_id,
                        retries = pending.retries,
                        "write retry limit reached"
                    );
                    pending
                        .fail(
                            ErrorKind::SendFailed,
                            format!("failed to write request after {} attempts: {err}", retry_limit),
                        )
                        .await;
                }
            }
        }
    }
}
