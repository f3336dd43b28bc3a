//! Internet Archive S3 client
//!
//! Each file is a single `PUT {endpoint}/{item}/{key}` with the item's
//! metadata carried in `x-archive-meta*` headers. The bucket (item) is
//! created on first write.

use crate::credentials::Credentials;
use crate::error::{StoreError, StoreResult};
use crate::item::ItemMetadata;
use crate::upload::store::{ObjectStoreClient, UploadReceipt, UploadSession};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Read buffer for streaming file bodies
const UPLOAD_CHUNK: usize = 256 * 1024;

/// Longest response body kept in an error
const MAX_ERROR_BODY: usize = 512;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the IA S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct IaS3Client {
    client: reqwest::Client,
    endpoint: String,
}

impl IaS3Client {
    pub fn new(endpoint: &str) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Session {
                reason: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ObjectStoreClient for IaS3Client {
    async fn new_session(
        &self,
        credentials: &Credentials,
        metadata: &ItemMetadata,
    ) -> StoreResult<Box<dyn UploadSession>> {
        Ok(Box::new(IaS3Session {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            headers: session_headers(credentials, metadata)?,
        }))
    }
}

/// Upload session with its headers prepared
struct IaS3Session {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

#[async_trait::async_trait]
impl UploadSession for IaS3Session {
    async fn upload(&self, local_path: &Path, item: &str, key: &str) -> StoreResult<UploadReceipt> {
        let local = |source| StoreError::Local {
            path: local_path.to_path_buf(),
            source,
        };

        let file = File::open(local_path).await.map_err(local)?;
        let bytes = file.metadata().await.map_err(local)?.len();

        let url = format!(
            "{}/{}/{}",
            self.endpoint,
            urlencoding::encode(item),
            urlencoding::encode(key)
        );
        debug!(url = %url, bytes, "PUT");

        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, UPLOAD_CHUNK));
        let response = self
            .client
            .put(&url)
            .headers(self.headers.clone())
            .header(CONTENT_LENGTH, bytes)
            .header("x-archive-size-hint", bytes)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Transport {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                item: item.to_string(),
                key: key.to_string(),
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        Ok(UploadReceipt {
            item: item.to_string(),
            key: key.to_string(),
            bytes,
            location: url,
        })
    }
}

/// Build the per-session header set: auth, bucket creation, derive, metadata
pub fn session_headers(credentials: &Credentials, metadata: &ItemMetadata) -> StoreResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    let auth = format!(
        "LOW {}:{}",
        credentials.access_key(),
        credentials.secret_key()
    );
    let mut auth = HeaderValue::from_str(&auth).map_err(|_| StoreError::Session {
        reason: "credentials contain characters not allowed in a header".to_string(),
    })?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    headers.insert("x-amz-auto-make-bucket", HeaderValue::from_static("1"));
    headers.insert(
        "x-archive-queue-derive",
        HeaderValue::from_static(if metadata.derive() { "1" } else { "0" }),
    );

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (key, _) in metadata.pairs() {
        *counts.entry(key.as_str()).or_default() += 1;
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (key, value) in metadata.pairs() {
        let index = seen.entry(key.as_str()).or_default();
        *index += 1;

        let name = if counts[key.as_str()] > 1 {
            format!("x-archive-meta{:02}-{}", index, header_key(key))
        } else {
            format!("x-archive-meta-{}", header_key(key))
        };

        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| StoreError::Session {
            reason: format!("metadata key '{}' is not a valid header name", key),
        })?;
        let value = HeaderValue::from_str(&header_value(value)).map_err(|_| StoreError::Session {
            reason: format!("metadata value for '{}' cannot be sent", key),
        })?;
        headers.append(name, value);
    }

    Ok(headers)
}

/// IA spells an underscore in a metadata key as `--`
fn header_key(key: &str) -> String {
    key.to_lowercase().replace('_', "--")
}

/// Non-ASCII values go through IA's `uri(...)` escape
fn header_value(value: &str) -> String {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        value.to_string()
    } else {
        format!("uri({})", urlencoding::encode(value))
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.trim().to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", body[..end].trim())
}
