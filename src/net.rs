use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{multipart, Client as HttpClient};
use reqwest::header::USER_AGENT;
use url::Url;

/// Shared flag telling an in-flight request its result is no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
    #[error("board answered {status}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx answer into [`FetchError::Status`].
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Board HTTP access. Paths are relative to the board root.
pub trait Transport: Send + Sync {
    fn get(&self, path: &str, cancel: &CancelToken) -> Result<Response, FetchError>;
    fn post(&self, path: &str, cancel: &CancelToken) -> Result<Response, FetchError>;
    fn post_form(
        &self,
        action: &str,
        fields: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<Response, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct HttpTransport {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("parse board base url {:?}", config.base_url))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("build board http client")?,
        };
        Ok(Self {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|_| FetchError::InvalidUrl(path.to_string()))
    }

    fn finish(
        &self,
        request: reqwest::blocking::RequestBuilder,
        cancel: &CancelToken,
    ) -> Result<Response, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let response = request.header(USER_AGENT, &self.user_agent).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(Response { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(&self, path: &str, cancel: &CancelToken) -> Result<Response, FetchError> {
        let url = self.url(path)?;
        self.finish(self.http.get(url), cancel)
    }

    fn post(&self, path: &str, cancel: &CancelToken) -> Result<Response, FetchError> {
        let url = self.url(path)?;
        self.finish(self.http.post(url), cancel)
    }

    fn post_form(
        &self,
        action: &str,
        fields: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<Response, FetchError> {
        let url = self.url(action)?;
        let form = fields
            .iter()
            .fold(multipart::Form::new(), |form, (name, value)| {
                form.text(name.clone(), value.clone())
            });
        self.finish(self.http.post(url).multipart(form), cancel)
    }
}

/// Browser-level navigation the page asks its host for.
pub trait Navigator {
    fn assign(&mut self, url: &str) -> Result<()>;
    fn open_window(&mut self, url: &str, features: Option<&str>) -> Result<()>;
    fn reload(&mut self) -> Result<()>;
    fn replace_history(&mut self, url: &str) -> Result<()>;
    fn open_annotation(&mut self, image_url: &str) -> Result<()>;
}

/// Hands navigation off to the system browser.
pub struct BrowserNavigator {
    base_url: Url,
}

impl BrowserNavigator {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn open(&self, target: &str) -> Result<()> {
        let url = self
            .base_url
            .join(target)
            .with_context(|| format!("resolve navigation target {target:?}"))?;
        webbrowser::open(url.as_str()).with_context(|| format!("open {url} in browser"))?;
        Ok(())
    }
}

impl Navigator for BrowserNavigator {
    fn assign(&mut self, url: &str) -> Result<()> {
        self.open(url)
    }

    fn open_window(&mut self, url: &str, _features: Option<&str>) -> Result<()> {
        self.open(url)
    }

    fn reload(&mut self) -> Result<()> {
        tracing::debug!("reload requested; headless view reloads on next fetch");
        Ok(())
    }

    fn replace_history(&mut self, url: &str) -> Result<()> {
        tracing::debug!(url, "history entry replaced");
        Ok(())
    }

    fn open_annotation(&mut self, image_url: &str) -> Result<()> {
        self.open(image_url)
    }
}
