//! Per-request execution context.

use crate::download::DownloadRegistry;
use crate::proto::Request;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// One-shot request/reply over `POST /execute`.
    Http,
    /// Multiplexed duplex connection over `GET /connect`.
    Websocket,
}

/// Kind of frame written to a duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// A frame queued on a connection's outbound channel.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl OutboundFrame {
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload: payload.into(),
        }
    }
}

/// Sending half of a connection's bounded outbound channel.
pub type OutboundSender = mpsc::Sender<OutboundFrame>;

/// Everything a handler can see about the request it is executing.
///
/// Built by the executor when a request is queued. `outbound` is present only
/// for requests that arrived on a duplex connection.
#[derive(Debug, Clone)]
pub struct RequestContext {
    transport: TransportKind,
    outbound: Option<OutboundSender>,
    request: Request,
    downloads: Arc<DownloadRegistry>,
}

impl RequestContext {
    pub fn new(
        transport: TransportKind,
        outbound: Option<OutboundSender>,
        request: Request,
        downloads: Arc<DownloadRegistry>,
    ) -> Self {
        Self {
            transport,
            outbound,
            request,
            downloads,
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Outbound channel of the originating duplex connection, if any.
    pub fn outbound(&self) -> Option<&OutboundSender> {
        self.outbound.as_ref()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Registry handlers use to publish ephemeral download entries.
    pub fn downloads(&self) -> &Arc<DownloadRegistry> {
        &self.downloads
    }

    /// Server-configured `(lifetime, limit)` for new download entries.
    pub fn download_defaults(&self) -> (Duration, u32) {
        (
            self.downloads.default_lifetime(),
            self.downloads.default_limit(),
        )
    }
}
