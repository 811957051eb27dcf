//! TCP listener and per-connection loop.
//!
//! Each connection is framed with [`LinesCodec`]. Requests run as their own
//! tasks so a slow preview never delays a `get-job` on the same socket;
//! responses and events funnel through one writer task.

use crate::error::{GatewayError, Result};
use crate::methods::{Handlers, Router};
use crate::protocol::{encode, parse_request, EventFrame, Request, Response};
use crate::session::Session;
use futures::{SinkExt, StreamExt};
use specforge_core::GatewayConfig;
use specforge_queue::JobEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

const OUTBOUND_CAPACITY: usize = 256;

/// Resolves and runs requests.
pub struct Dispatcher {
    router: Router,
    handlers: Handlers,
}

impl Dispatcher {
    /// Create a dispatcher over `handlers`.
    #[must_use]
    pub fn new(handlers: Handlers) -> Self {
        Self {
            router: Router::new(),
            handlers,
        }
    }

    /// Answer one request. Never fails; errors become error responses.
    pub async fn dispatch(&self, request: Request, session: &Session) -> Response {
        let Request { id, method, params } = request;
        let outcome = match self.router.resolve(&method) {
            Ok(resolved) => self.handlers.call(resolved, params, session).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                tracing::debug!("Request {} ({}) succeeded", id, method);
                Response::ok(id, result)
            }
            Err(e) => {
                tracing::debug!("Request {} ({}) failed: {}", id, method, e);
                Response::err(Some(id), e)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.handlers.queue().events().subscribe()
    }
}

/// A bound gateway listener.
pub struct Gateway {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    max_line_bytes: usize,
}

impl Gateway {
    /// Bind the configured address.
    pub async fn bind(config: &GatewayConfig, handlers: Handlers) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        Ok(Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(handlers)),
            max_line_bytes: config.max_line_bytes,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is tripped.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("Gateway listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            tracing::debug!("Client connected from {}", peer);
            let dispatcher = self.dispatcher.clone();
            let session = Session::new(shutdown.child_token());
            let max_line_bytes = self.max_line_bytes;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, dispatcher, session, max_line_bytes).await {
                    tracing::warn!("Connection from {} ended with error: {}", peer, e);
                }
                tracing::debug!("Client {} disconnected", peer);
            });
        }

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    session: Session,
    max_line_bytes: usize,
) -> Result<()> {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(max_line_bytes));
    let (mut sink, mut lines) = framed.split();
    let (outbound, mut queued) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(line) = queued.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::debug!("Dropping outbound frames: {}", e);
                break;
            }
        }
    });

    let forwarder = tokio::spawn(forward_events(
        dispatcher.subscribe(),
        session.clone(),
        outbound.clone(),
    ));

    let outcome = loop {
        let next = tokio::select! {
            () = session.cancel_token().cancelled() => break Ok(()),
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let error = GatewayError::InvalidParams(format!(
                    "request line exceeds {max_line_bytes} bytes"
                ));
                send(&outbound, &Response::err(None, error)).await;
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => break Err(GatewayError::Io(e)),
            None => break Ok(()),
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_request(&line) {
            Ok(request) => {
                let dispatcher = dispatcher.clone();
                let session = session.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(request, &session).await;
                    send(&outbound, &response).await;
                });
            }
            Err((id, error)) => {
                tracing::debug!("Rejected request line: {}", error);
                send(&outbound, &Response::err(id, error)).await;
            }
        }
    };

    // Stops the event forwarder and any preview still running for this
    // connection. Jobs it submitted keep running.
    session.cancel_token().cancel();
    if let Err(e) = forwarder.await {
        tracing::warn!("Event forwarder failed: {}", e);
    }
    drop(outbound);
    if let Err(e) = writer.await {
        tracing::warn!("Connection writer failed: {}", e);
    }
    outcome
}

async fn forward_events(
    mut events: broadcast::Receiver<JobEvent>,
    session: Session,
    outbound: mpsc::Sender<String>,
) {
    loop {
        let received = tokio::select! {
            () = session.cancel_token().cancelled() => break,
            received = events.recv() => received,
        };

        match received {
            Ok(event) if session.is_watching(event.job_id()) => {
                let Some(line) = encode(&EventFrame { event: &event }) else {
                    continue;
                };
                if outbound.send(line).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Connection lagged behind the event bus; skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send(outbound: &mpsc::Sender<String>, response: &Response) {
    if let Some(line) = encode(response) {
        if outbound.send(line).await.is_err() {
            tracing::debug!("Connection closed before response {:?} was sent", response.id);
        }
    }
}
