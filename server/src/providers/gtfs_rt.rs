use gtfs_realtime::FeedMessage;
use prost::Message;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::FeedConfig;

/// Largest protobuf body accepted from a feed (50 MB)
const MAX_FEED_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Alerts,
    TripUpdates,
    VehiclePositions,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedKind::Alerts => "alerts",
            FeedKind::TripUpdates => "trip updates",
            FeedKind::VehiclePositions => "vehicle positions",
        };
        f.write_str(name)
    }
}

/// HTTP client for the three GTFS-RT feeds. Every fetch is a fresh request,
/// no caching happens here.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    alerts_url: String,
    trip_updates_url: String,
    vehicle_positions_url: String,
}

impl FeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(5)))
            .build()
            .map_err(|e| FeedError::Client(e.to_string()))?;

        Ok(Self {
            client,
            alerts_url: config.alerts_url.clone(),
            trip_updates_url: config.trip_updates_url.clone(),
            vehicle_positions_url: config.vehicle_positions_url.clone(),
        })
    }

    fn url(&self, kind: FeedKind) -> &str {
        match kind {
            FeedKind::Alerts => &self.alerts_url,
            FeedKind::TripUpdates => &self.trip_updates_url,
            FeedKind::VehiclePositions => &self.vehicle_positions_url,
        }
    }

    pub async fn fetch(&self, kind: FeedKind) -> Result<FeedMessage, FeedError> {
        let url = self.url(kind);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Fetch {
                feed: kind,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                feed: kind,
                status: response.status().as_u16(),
            });
        }

        // Refuse oversized bodies before buffering them
        if let Some(length) = response.content_length() {
            if length > MAX_FEED_SIZE as u64 {
                return Err(FeedError::TooLarge { feed: kind, bytes: length });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| FeedError::Fetch {
            feed: kind,
            message: e.to_string(),
        })? {
            if bytes.len() + chunk.len() > MAX_FEED_SIZE {
                return Err(FeedError::TooLarge {
                    feed: kind,
                    bytes: (bytes.len() + chunk.len()) as u64,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        let feed = decode_feed(kind, &bytes)?;
        debug!(feed = %kind, entities = feed.entity.len(), bytes = bytes.len(), "Fetched feed");
        Ok(feed)
    }
}

pub fn decode_feed(kind: FeedKind, bytes: &[u8]) -> Result<FeedMessage, FeedError> {
    FeedMessage::decode(bytes).map_err(|e| FeedError::Parse {
        feed: kind,
        message: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Failed to fetch {feed} feed: {message}")]
    Fetch { feed: FeedKind, message: String },
    #[error("{feed} feed body too large: at least {bytes} bytes")]
    TooLarge { feed: FeedKind, bytes: u64 },
    #[error("{feed} feed returned HTTP {status}")]
    Status { feed: FeedKind, status: u16 },
    #[error("Failed to decode {feed} feed: {message}")]
    Parse { feed: FeedKind, message: String },
}
