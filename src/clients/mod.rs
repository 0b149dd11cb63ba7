/// Upstream HTTP client module
use crate::config::ScraperConfig;
use crate::domain::FormRequest;
use crate::errors::{ScrapeError, ScrapeResultOf};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, SET_COOKIE,
};
use reqwest::{Client, RequestBuilder, Url};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Something that can serve the flight board page and accept postbacks to it
pub trait PageTransport: Send + Sync {
    fn fetch_initial(&self) -> BoxFuture<'_, ScrapeResultOf<String>>;

    fn post_form<'a>(&'a self, form: &'a FormRequest) -> BoxFuture<'a, ScrapeResultOf<String>>;
}

/// HTTP client wrapper with common configuration.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("es-ES,es;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            max_retries: config.max_retries,
        })
    }

    /// Open a fresh server session over the shared pool
    pub fn session(&self) -> SessionClient {
        SessionClient {
            http: self.clone(),
            cookies: Jar::default(),
        }
    }
}

/// One browser-like session: shared pool, private cookie jar.
///
/// Must not be used by two scrapes at once, the server ties view state to it.
pub struct SessionClient {
    http: HttpClient,
    cookies: Jar,
}

impl SessionClient {
    /// Send a request with bounded retries on transport errors and 5xx
    async fn send_with_retry<F>(&self, build: F) -> ScrapeResultOf<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let url = &self.http.base_url;
        let attempts = self.http.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut request = build(&self.http.client);
            if let Some(cookie) = self.cookies.cookies(url) {
                request = request.header(COOKIE, cookie);
            }

            match request.send().await {
                Ok(resp) => {
                    {
                        let mut set_cookies = resp.headers().get_all(SET_COOKIE).iter();
                        self.cookies.set_cookies(&mut set_cookies, url);
                    }

                    let status = resp.status();
                    if status.is_server_error() {
                        last_error = format!("HTTP {}", status);
                    } else if !status.is_success() {
                        return Err(ScrapeError::UpstreamStatus {
                            status: status.as_u16(),
                        });
                    } else {
                        match resp.text().await {
                            Ok(body) => {
                                debug!("Fetched {} bytes (attempt {})", body.len(), attempt);
                                return Ok(body);
                            }
                            Err(e) => last_error = e.to_string(),
                        }
                    }
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < attempts {
                warn!(
                    "Request attempt {}/{} failed: {} - retrying",
                    attempt, attempts, last_error
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
        }

        Err(ScrapeError::Network {
            attempts,
            message: last_error,
        })
    }
}

impl PageTransport for SessionClient {
    fn fetch_initial(&self) -> BoxFuture<'_, ScrapeResultOf<String>> {
        let url = self.http.base_url.clone();
        self.send_with_retry(move |client| client.get(url.clone()))
            .boxed()
    }

    fn post_form<'a>(&'a self, form: &'a FormRequest) -> BoxFuture<'a, ScrapeResultOf<String>> {
        let url = self.http.base_url.clone();
        self.send_with_retry(move |client| client.post(url.clone()).form(form.fields()))
            .boxed()
    }
}
