//! Google Cloud Storage back end
//!
//! Talks to the Cloud Storage JSON API directly over `reqwest`: paginated
//! object listing, `alt=media` downloads streamed to disk, and single-request
//! media uploads streamed from disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Body, Client, RequestBuilder, Url};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use common::error::{Error, Result};
use security::TokenSource;

use crate::blob::{BlobDescriptor, BlobStore};
use crate::transfer::write_response;

/// Public Cloud Storage endpoint
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,

    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectResource {
    name: String,

    // The JSON API encodes 64-bit sizes as strings.
    size: Option<String>,
}

/// Cloud Storage bucket
pub struct GcsBlobStore {
    /// HTTP client
    client: Client,

    /// Bucket name
    bucket: String,

    /// API base URL
    endpoint: String,

    /// Bearer token source; `None` for emulators that accept anonymous calls
    token_source: Option<Arc<dyn TokenSource>>,
}

impl GcsBlobStore {
    /// Creates a store for `bucket` on the public endpoint
    pub fn new(bucket: impl Into<String>, token_source: Option<Arc<dyn TokenSource>>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("model-server/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bucket: bucket.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_source,
        })
    }

    /// Points the store at another endpoint, e.g. `STORAGE_EMULATOR_HOST`
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds `<endpoint>[/upload]/storage/v1/b/<bucket>/o[/<object>]`
    ///
    /// Object names are pushed as a single path segment, so `/` inside them is
    /// percent-encoded as the API requires.
    fn api_url(&self, upload: bool, object: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid storage endpoint {}: {}", self.endpoint, e)))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Config(format!("invalid storage endpoint {}", self.endpoint)))?;
            segments.pop_if_empty();
            if upload {
                segments.push("upload");
            }
            segments.extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
            if let Some(object) = object {
                segments.push(object);
            }
        }

        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match &self.token_source {
            Some(source) => {
                let token = source
                    .access_token()
                    .await
                    .map_err(|e| Error::TransientStore(format!("no access token for bucket {}: {}", self.bucket, e)))?;
                Ok(request.bearer_auth(token))
            }
            None => Ok(request),
        }
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    fn location(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobDescriptor>> {
        let mut blobs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.api_url(false, None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                query.append_pair("fields", "items(name,size),nextPageToken");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            trace!("Listing {}", url);
            let request = self.authorize(self.client.get(url)).await?;
            let resp = request
                .send()
                .await
                .map_err(|e| Error::TransientStore(format!("listing bucket {} failed: {}", self.bucket, e)))?;

            if !resp.status().is_success() {
                return Err(Error::TransientStore(format!(
                    "listing bucket {} failed: HTTP {}",
                    self.bucket,
                    resp.status()
                )));
            }

            let page: ObjectList = resp
                .json()
                .await
                .map_err(|e| Error::TransientStore(format!("malformed listing from bucket {}: {}", self.bucket, e)))?;

            blobs.extend(page.items.into_iter().map(|item| BlobDescriptor {
                size: item.size.and_then(|s| s.parse().ok()),
                name: item.name,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Found {} objects under gs://{}/{}", blobs.len(), self.bucket, prefix);
        Ok(blobs)
    }

    async fn download(&self, object: &str, destination: &Path) -> Result<u64> {
        let mut url = self.api_url(false, Some(object))?;
        url.query_pairs_mut().append_pair("alt", "media");

        let request = self.authorize(self.client.get(url)).await?;
        let resp = request
            .send()
            .await
            .map_err(|e| Error::TransientStore(format!("downloading {} failed: {}", object, e)))?;

        if !resp.status().is_success() {
            return Err(Error::TransientStore(format!(
                "downloading {} failed: HTTP {}",
                object,
                resp.status()
            )));
        }

        write_response(resp, destination, Error::TransientStore).await
    }

    async fn upload(&self, source: &Path, object: &str) -> Result<u64> {
        let mut url = self.api_url(true, None)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);

        let file = tokio::fs::File::open(source)
            .await
            .map_err(|e| Error::Upload(format!("cannot open {}: {}", source.display(), e)))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| Error::Upload(format!("cannot stat {}: {}", source.display(), e)))?
            .len();

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)));

        let resp = self
            .authorize(request)
            .await
            .map_err(|e| Error::Upload(e.to_string()))?
            .send()
            .await
            .map_err(|e| Error::Upload(format!("uploading {} failed: {}", object, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Upload(format!(
                "uploading {} failed: HTTP {}",
                object,
                resp.status()
            )));
        }

        Ok(length)
    }
}
