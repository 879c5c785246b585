use ingestor::model::Record;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

pub type Result<T> = std::result::Result<T, SendError>;

/// Raw reply from the endpoint
#[derive(Debug, Clone)]
pub struct Delivery {
    pub status: StatusCode,
    pub body: String,
}

impl Delivery {
    /// Same check the device-side harness uses: HTTP 200 and `"ok":true` in the text.
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK && self.body.contains("\"ok\":true")
    }

    fn into_result(self) -> Result<Delivery> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(SendError::Rejected {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// One-shot sender for the event log endpoint. Never retries.
#[derive(Debug, Clone)]
pub struct LogClient {
    http: reqwest::Client,
    url: String,
}

impl LogClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Sends a record as query parameters over GET, like the firmware does.
    pub async fn send(&self, record: &Record) -> Result<Delivery> {
        let params = record.to_params();
        debug!("GET {} sheet={}", self.url, record.sheet());
        let resp = self.http.get(&self.url).query(&params).send().await?;
        let delivery = Delivery {
            status: resp.status(),
            body: resp.text().await?,
        };
        delivery.into_result()
    }

    /// POSTs an arbitrary JSON payload.
    pub async fn post_json(&self, payload: &serde_json::Value) -> Result<Delivery> {
        debug!("POST {}", self.url);
        let resp = self.http.post(&self.url).json(payload).send().await?;
        let delivery = Delivery {
            status: resp.status(),
            body: resp.text().await?,
        };
        delivery.into_result()
    }
}
