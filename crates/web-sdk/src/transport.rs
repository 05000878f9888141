//! Batch delivery to the ingestion endpoint.
//!
//! Two strategies sit behind [`TransportStrategy`]: an ordinary async POST
//! for regular flushes and a beacon-style hand-off for teardown flushes.
//! [`Transport`] picks one per call from the caller's teardown flag. Both
//! are fire-and-forget: failures are logged and the batch is dropped.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a batch is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Regular flush; an ordinary async request.
    Request,
    /// Teardown flush; must not wait on anything.
    Beacon,
}

pub trait TransportStrategy: Send + Sync {
    /// Hand a serialized batch off for delivery. Must return without
    /// waiting for the network.
    fn deliver(&self, payload: Bytes, mode: DeliveryMode);
}

async fn post_batch(client: &reqwest::Client, endpoint: &str, payload: Bytes) {
    let size = payload.len();
    match client
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .body(payload)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            debug!(status = %response.status(), bytes = size, "telemetry batch delivered");
        }
        Ok(response) => {
            warn!(status = %response.status(), bytes = size, "telemetry batch rejected");
        }
        Err(e) => {
            warn!(error = %e, bytes = size, "telemetry batch delivery failed");
        }
    }
}

/// Ordinary async POST spawned on the ambient tokio runtime. Never retried.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl TransportStrategy for HttpTransport {
    fn deliver(&self, payload: Bytes, _mode: DeliveryMode) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime available, dropping telemetry batch");
            return;
        };
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        handle.spawn(async move {
            post_batch(&client, &endpoint, payload).await;
        });
    }
}

/// Beacon-style delivery: payloads go into a bounded queue drained by a
/// background worker, so the caller never awaits and delivery continues
/// after the caller has gone away.
pub struct BeaconTransport {
    sender: mpsc::Sender<Bytes>,
}

impl BeaconTransport {
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Start the background worker on the ambient runtime. Without a
    /// runtime the beacon is closed and every payload is dropped.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Bytes>(capacity.max(1));
        let endpoint = endpoint.into();

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while let Some(payload) = receiver.recv().await {
                        post_batch(&client, &endpoint, payload).await;
                    }
                });
            }
            Err(_) => warn!("no async runtime available, beacon transport disabled"),
        }

        Self { sender }
    }
}

impl TransportStrategy for BeaconTransport {
    fn deliver(&self, payload: Bytes, _mode: DeliveryMode) {
        if let Err(e) = self.sender.try_send(payload) {
            warn!(error = %e, "beacon queue unavailable, dropping telemetry batch");
        }
    }
}

/// Records every payload in memory instead of sending it.
#[derive(Default)]
pub struct CaptureTransport {
    sent: Mutex<Vec<(DeliveryMode, Bytes)>>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn deliveries(&self) -> Vec<(DeliveryMode, Bytes)> {
        self.sent.lock().clone()
    }

    /// Decoded payloads, in delivery order.
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, body)| serde_json::from_slice(body).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl TransportStrategy for CaptureTransport {
    fn deliver(&self, payload: Bytes, mode: DeliveryMode) {
        self.sent.lock().push((mode, payload));
    }
}

/// Strategy pair selected per send by the teardown flag.
#[derive(Clone)]
pub struct Transport {
    request: Arc<dyn TransportStrategy>,
    beacon: Arc<dyn TransportStrategy>,
}

impl Transport {
    pub fn new(request: Arc<dyn TransportStrategy>, beacon: Arc<dyn TransportStrategy>) -> Self {
        Self { request, beacon }
    }

    /// HTTP request and beacon strategies sharing one client.
    pub fn http(endpoint: &str) -> Self {
        let client = reqwest::Client::new();
        Self::new(
            Arc::new(HttpTransport::new(client.clone(), endpoint)),
            Arc::new(BeaconTransport::new(
                client,
                endpoint,
                BeaconTransport::DEFAULT_CAPACITY,
            )),
        )
    }

    /// Both strategies record into the returned capture.
    pub fn capture() -> (Self, Arc<CaptureTransport>) {
        let capture = Arc::new(CaptureTransport::new());
        let strategy: Arc<dyn TransportStrategy> = capture.clone();
        (Self::new(strategy.clone(), strategy), capture)
    }

    pub fn send(&self, payload: Bytes, teardown: bool) {
        if teardown {
            self.beacon.deliver(payload, DeliveryMode::Beacon);
        } else {
            self.request.deliver(payload, DeliveryMode::Request);
        }
    }
}
