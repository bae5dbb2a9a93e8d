//! Route emission to the router registry.
//!
//! Delivery is fire-and-forget: a failed publish is counted and logged, the
//! remaining messages are still sent, and the next collector run repairs
//! whatever was lost.

use std::sync::Arc;

use async_trait::async_trait;
use tether_events::{EventError, RouteMessage};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

mod nats;

pub use nats::{encode_connect, encode_pub, parse_server_op, NatsPublisher, ServerOp};

/// Maximum number of queued messages emitted together by the emit loop.
const EMIT_BATCH: usize = 64;

/// Errors from a single publish.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The publisher's connection task has stopped.
    #[error("publisher closed")]
    Closed,

    /// The outbound buffer is full.
    #[error("publish buffer full")]
    Backlog,

    #[error("encoding error: {0}")]
    Encode(#[from] EventError),
}

/// Errors from emitting a set of messages.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Some publishes failed; the rest were sent.
    #[error("{failed} of {total} route publishes failed, last error: {last}")]
    Partial {
        failed: usize,
        total: usize,
        last: String,
    },
}

/// Publishes payloads on a message-bus subject.
#[async_trait]
pub trait RoutePublisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Sends route messages to the router subjects.
pub struct RouteEmitter {
    publisher: Arc<dyn RoutePublisher>,
}

impl RouteEmitter {
    pub fn new(publisher: Arc<dyn RoutePublisher>) -> Self {
        Self { publisher }
    }

    /// Publishes every non-empty side of every message.
    ///
    /// Continues past failures and reports them together.
    pub async fn emit(&self, messages: &[RouteMessage]) -> Result<(), EmitError> {
        let mut total = 0usize;
        let mut failed = 0usize;
        let mut last = None;

        for message in messages {
            let frames = match message.encode() {
                Ok(frames) => frames,
                Err(EventError::EmptyRoutes { .. }) => {
                    debug!(instance = %message.instance_id, "Skipping empty route message");
                    continue;
                }
                Err(e) => {
                    total += 1;
                    failed += 1;
                    warn!(instance = %message.instance_id, error = %e, "Failed to encode route");
                    last = Some(PublishError::from(e).to_string());
                    continue;
                }
            };

            for (subject, payload) in frames {
                total += 1;
                if let Err(e) = self.publisher.publish(subject, payload).await {
                    failed += 1;
                    warn!(
                        subject,
                        instance = %message.instance_id,
                        address = %message.address,
                        error = %e,
                        "Failed to publish route"
                    );
                    last = Some(e.to_string());
                }
            }
        }

        match last {
            Some(last) => Err(EmitError::Partial {
                failed,
                total,
                last,
            }),
            None => {
                debug!(published = total, "Emitted routes");
                Ok(())
            }
        }
    }
}

/// Drains informer output into the emitter until shutdown or until every
/// sender is gone.
pub async fn run_emit_loop(
    mut rx: mpsc::Receiver<RouteMessage>,
    emitter: Arc<RouteEmitter>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting route emit loop");
    let mut batch = Vec::with_capacity(EMIT_BATCH);

    loop {
        let received = tokio::select! {
            biased;
            _ = crate::shutdown_requested(&mut shutdown) => break,
            received = rx.recv_many(&mut batch, EMIT_BATCH) => received,
        };

        if received == 0 {
            break;
        }

        if let Err(e) = emitter.emit(&batch).await {
            warn!(error = %e, "Route emission incomplete");
        }
        batch.clear();
    }

    info!("Route emit loop stopped");
}
