//! JSON-over-HTTP provider.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Call | Request | Reply |
//! |------|---------|-------|
//! | submit | `POST v1/projects/{project}/exports` | `{"id", "state"}` |
//! | status | `GET v1/projects/{project}/exports/{id}` | `{"state", "error_message"?, "destination"?}` |
//! | direct download | `POST v1/projects/{project}/downloads` | `{"url"}` |
//! | download | `GET {url}` | artifact bytes |

use crate::error::{Error, ErrorKind, Result};
use crate::job::{JobHandle, JobState, JobStatus};
use crate::provider::{ByteStream, ExportProvider};
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use terracache_config::Config;
use terracache_descriptor::ArtifactDescriptor;
use url::Url;

#[derive(Serialize)]
struct ExportRequest<'a> {
    descriptor: &'a ArtifactDescriptor,
    folder: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
    file_format: &'a str,
}

#[derive(Deserialize)]
struct SubmitReply {
    id: String,
    state: JobState,
}

#[derive(Deserialize)]
struct DownloadReply {
    url: String,
}

#[derive(Clone, Debug)]
pub struct HttpProvider {
    client: Client,
    base: Url,
    project: String,
    token: Option<String>,
    folder: String,
    file_format: String,
}

impl HttpProvider {
    pub fn new(base_url: &str, project: impl Into<String>) -> Result<Self> {
        let base = Url::parse(base_url).or_raise(|| ErrorKind::Config(format!("base_url {base_url:?} is not a URL")))?;
        if base.cannot_be_a_base() {
            exn::bail!(ErrorKind::Config(format!("base_url {base_url:?} cannot be a base URL")));
        }
        let project = project.into();
        if project.is_empty() {
            exn::bail!(ErrorKind::Config("project must not be empty".to_string()));
        }
        let client = Client::builder()
            .user_agent(concat!("terracache/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Config("could not build HTTP client".to_string()))?;
        Ok(Self {
            client,
            base,
            project,
            token: None,
            folder: "exports".to_string(),
            file_format: "tif".to_string(),
        })
    }

    /// Build from the `provider`, `export` and `cache` sections. A `token`
    /// passed here wins over the configured one.
    pub fn from_config(config: &Config, token: Option<String>) -> Result<Self> {
        let provider = Self::new(&config.provider.base_url, config.provider.project.clone())?
            .with_folder(config.export.export_folder.clone())
            .with_file_format(config.cache.extension.trim_start_matches('.'));
        Ok(match token.or_else(|| config.provider.token.clone()) {
            Some(token) => provider.with_token(token),
            None => provider,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Folder under the shared mount that async jobs write to.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn with_file_format(mut self, format: impl Into<String>) -> Self {
        self.file_format = format.into();
        self
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ErrorKind::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(["v1", "projects", self.project.as_str()])
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        // Signed download URLs usually point elsewhere; only our own API gets the token.
        let same_origin = url.origin() == self.base.origin();
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) if same_origin => builder.bearer_auth(token),
            _ => builder,
        }
    }

    fn body<'a>(&'a self, descriptor: &'a ArtifactDescriptor, file_name: Option<&'a str>) -> ExportRequest<'a> {
        ExportRequest { descriptor, folder: &self.folder, file_name, file_format: &self.file_format }
    }
}

/// Turn a non-2xx response into `kind(message)`, keeping the body.
async fn reject(response: Response, kind: fn(String) -> ErrorKind) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    exn::Exn::from(kind(format!("HTTP {status}: {body}")))
}

#[async_trait]
impl ExportProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    #[tracing::instrument(skip_all, fields(name = descriptor.name(), output = output))]
    async fn submit(&self, descriptor: &ArtifactDescriptor, output: &str) -> Result<JobHandle> {
        let url = self.endpoint(&["exports"])?;
        let response = self
            .request(Method::POST, url)
            .json(&self.body(descriptor, Some(output)))
            .send()
            .await
            .or_raise(|| ErrorKind::Submission(format!("could not reach {}", self.base)))?;
        if !response.status().is_success() {
            return Err(reject(response, ErrorKind::Submission).await);
        }
        let reply: SubmitReply =
            response.json().await.or_raise(|| ErrorKind::InvalidResponse("malformed submit reply".to_string()))?;
        tracing::debug!(job = %reply.id, state = %reply.state, "job accepted");
        Ok(JobHandle::new(reply.id, output))
    }

    #[tracing::instrument(skip_all, fields(job = %job.id))]
    async fn status(&self, job: &JobHandle) -> Result<JobStatus> {
        let url = self.endpoint(&["exports", job.id.as_str()])?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .or_raise(|| ErrorKind::Status(format!("could not reach {}", self.base)))?;
        if !response.status().is_success() {
            return Err(reject(response, ErrorKind::Status).await);
        }
        let raw: serde_json::Value =
            response.json().await.or_raise(|| ErrorKind::InvalidResponse("status reply is not JSON".to_string()))?;
        JobStatus::from_json(raw).or_raise(|| ErrorKind::InvalidResponse("malformed status reply".to_string()))
    }

    #[tracing::instrument(skip_all, fields(name = descriptor.name()))]
    async fn request_direct_download(&self, descriptor: &ArtifactDescriptor) -> Result<Url> {
        let url = self.endpoint(&["downloads"])?;
        let response = self
            .request(Method::POST, url)
            .json(&self.body(descriptor, None))
            .send()
            .await
            .or_raise(|| ErrorKind::Transfer(format!("could not reach {}", self.base)))?;
        if !response.status().is_success() {
            return Err(reject(response, ErrorKind::Transfer).await);
        }
        let reply: DownloadReply =
            response.json().await.or_raise(|| ErrorKind::InvalidResponse("malformed download reply".to_string()))?;
        Url::parse(&reply.url).or_raise(|| ErrorKind::InvalidResponse(format!("download url {:?}", reply.url)))
    }

    #[tracing::instrument(skip_all, fields(url = %url.origin().ascii_serialization()))]
    async fn download(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .or_raise(|| ErrorKind::Transfer("download request failed".to_string()))?;
        if !response.status().is_success() {
            return Err(reject(response, ErrorKind::Transfer).await);
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.or_raise(|| ErrorKind::Transfer("connection dropped mid-download".to_string())));
        Ok(Box::pin(stream))
    }
}
