//! Delivery sinks used by the notification dispatcher
//!
//! Every sink runs on the dispatcher's consumer task only, so sinks are free
//! to block on network or file I/O.

use super::types::VitalSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One unit of outbound work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryItem {
    Email {
        recipient: String,
        subject_line: String,
        body: String,
    },
    CloudUpload {
        subject_id: String,
        sample: VitalSample,
    },
    Beep {
        subject_id: String,
        count: u32,
    },
}

impl DeliveryItem {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryItem::Email { .. } => "email",
            DeliveryItem::CloudUpload { .. } => "cloud_upload",
            DeliveryItem::Beep { .. } => "beep",
        }
    }
}

#[derive(Debug)]
pub enum DeliveryError {
    Http(reqwest::Error),
    Status(u16),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Timeout(Duration),
    NoSink(&'static str),
    Unsupported(&'static str),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Http(err)
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(err: std::io::Error) -> Self {
        DeliveryError::Io(err)
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        DeliveryError::Serialization(err)
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Http(e) => write!(f, "HTTP error: {}", e),
            DeliveryError::Status(code) => write!(f, "Endpoint returned status {}", code),
            DeliveryError::Io(e) => write!(f, "IO error: {}", e),
            DeliveryError::Serialization(e) => write!(f, "Serialization error: {}", e),
            DeliveryError::Timeout(d) => write!(f, "Delivery timed out after {}ms", d.as_millis()),
            DeliveryError::NoSink(kind) => write!(f, "No sink configured for {} items", kind),
            DeliveryError::Unsupported(kind) => write!(f, "Sink cannot deliver {} items", kind),
        }
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one item; errors are logged by the caller and never retried
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError>;

    /// Sink name for logging
    fn sink_type(&self) -> &'static str;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, DeliveryError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[derive(Serialize)]
struct RelayEmail<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Sends emails through an HTTP mail relay (`POST {to, subject, body}`)
pub struct HttpEmailRelay {
    client: reqwest::Client,
    url: String,
}

impl HttpEmailRelay {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DeliverySink for HttpEmailRelay {
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError> {
        let DeliveryItem::Email {
            recipient,
            subject_line,
            body,
        } = item
        else {
            return Err(DeliveryError::Unsupported(item.kind()));
        };

        let payload = RelayEmail {
            to: recipient,
            subject: subject_line,
            body,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "email-relay"
    }
}

#[derive(Serialize)]
struct UploadBody<'a> {
    subject_id: &'a str,
    sample: &'a VitalSample,
}

/// Uploads samples to a cloud telemetry endpoint
pub struct CloudUploadSink {
    client: reqwest::Client,
    url: String,
}

impl CloudUploadSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DeliverySink for CloudUploadSink {
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError> {
        let DeliveryItem::CloudUpload { subject_id, sample } = item else {
            return Err(DeliveryError::Unsupported(item.kind()));
        };

        let response = self
            .client
            .post(&self.url)
            .json(&UploadBody { subject_id, sample })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "cloud-upload"
    }
}

/// Appends items as JSON lines to a local outbox file
///
/// Stands in for the email relay or the cloud endpoint when none is configured.
pub struct JsonlOutbox {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlOutbox {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;

        log::info!("📝 Writing outbound notifications to: {}", path.as_ref().display());
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl DeliverySink for JsonlOutbox {
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError> {
        let json = serde_json::to_string(item)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "jsonl-outbox"
    }
}
