use std::{collections::HashMap, sync::Arc, sync::OnceLock, time::Duration};

use log::{debug, warn};
use reqwest::{
    cookie::{CookieStore, Jar},
    header::HeaderMap,
    Method, StatusCode,
};
use scraper::Selector;
use url::Url;

use super::{create_client_builder, FetchConfig, InvalidHeader};

const CHALLENGE_MARKERS: [&str; 5] = [
    "<title>just a moment...</title>",
    "/cdn-cgi/challenge-platform/",
    "cf_chl_opt",
    "cf-browser-verification",
    "challenges.cloudflare.com",
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} responded with {status}")]
    HttpStatus { url: String, status: StatusCode },
    #[error("anti-bot challenge for {url} was not solved")]
    ChallengeUnsolved { url: String },
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error, url: &Url) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

impl From<InvalidHeader> for FetchError {
    fn from(value: InvalidHeader) -> Self {
        FetchError::InvalidRequest(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PageFetchRequest {
    pub url: Url,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl PageFetchRequest {
    pub fn new(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|err| FetchError::InvalidRequest(format!("{url}: {err}")))?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(FetchError::InvalidRequest(format!(
                "{url}: expected an absolute http(s) url"
            )));
        }

        Ok(Self {
            url,
            headers: HashMap::new(),
            timeout: None,
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Page content served after any challenge was passed.
#[derive(Debug, Clone)]
pub struct ProtectedDocument {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub html: String,
}

impl ProtectedDocument {
    pub fn document(&self) -> scraper::Html {
        scraper::Html::parse_document(&self.html)
    }
}

/// Interstitial response captured instead of the requested page.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub html: String,
}

pub fn is_challenge(status: StatusCode, headers: &HeaderMap, body: &str) -> bool {
    if !matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        return false;
    }

    let mitigated = headers
        .get("cf-mitigated")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"));

    if mitigated {
        return true;
    }

    let body = body.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Derives clearance for the client that received a challenge. Clearance
/// lives in the client's cookie jar; the fetcher retries the original request
/// once after `solve` returns.
pub trait ChallengeSolver {
    async fn solve(
        &self,
        client: &reqwest::Client,
        challenge: &Challenge,
        config: &FetchConfig,
    ) -> Result<(), FetchError>;
}

/// Handles cookie based interstitials: cookies issued with the challenge are
/// already in the jar, and a legacy `#challenge-form` is submitted with its
/// hidden fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterstitialSolver;

#[derive(Debug, PartialEq)]
struct ChallengeForm {
    action: Url,
    method: Method,
    fields: Vec<(String, String)>,
}

fn find_challenge_form(challenge: &Challenge) -> Option<ChallengeForm> {
    static FORM_SELECTOR: OnceLock<Selector> = OnceLock::new();
    static INPUT_SELECTOR: OnceLock<Selector> = OnceLock::new();

    let document = scraper::Html::parse_document(&challenge.html);
    let form = document
        .select(FORM_SELECTOR.get_or_init(|| Selector::parse("form#challenge-form").unwrap()))
        .next()?;

    let action = challenge.url.join(form.attr("action").unwrap_or_default()).ok()?;
    let method = match form.attr("method") {
        Some(m) if m.eq_ignore_ascii_case("get") => Method::GET,
        _ => Method::POST,
    };

    let fields = form
        .select(INPUT_SELECTOR.get_or_init(|| Selector::parse("input[name]").unwrap()))
        .filter_map(|input| {
            let name = input.attr("name")?;
            Some((name.to_owned(), input.attr("value").unwrap_or_default().to_owned()))
        })
        .collect();

    Some(ChallengeForm {
        action,
        method,
        fields,
    })
}

impl ChallengeSolver for InterstitialSolver {
    async fn solve(
        &self,
        client: &reqwest::Client,
        challenge: &Challenge,
        config: &FetchConfig,
    ) -> Result<(), FetchError> {
        if !config.challenge_delay.is_zero() {
            tokio::time::sleep(config.challenge_delay).await;
        }

        let Some(form) = find_challenge_form(challenge) else {
            debug!("[cloudflare] no challenge form, relying on issued cookies");
            return Ok(());
        };

        debug!("[cloudflare] submitting challenge form to {}", form.action);

        let request = if form.method == Method::GET {
            client.get(form.action.clone()).query(&form.fields)
        } else {
            client.post(form.action.clone()).form(&form.fields)
        };

        let response = request
            .header(reqwest::header::REFERER, challenge.url.as_str())
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(err, &form.action))?;

        if !response.status().is_success() && !response.status().is_redirection() {
            warn!(
                "[cloudflare] challenge form rejected with {}",
                response.status()
            );
        }

        Ok(())
    }
}

enum Page {
    Content(ProtectedDocument),
    Challenge(Challenge),
}

async fn send(client: &reqwest::Client, request: &PageFetchRequest) -> Result<Page, FetchError> {
    let mut builder = client.get(request.url.clone());
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    let response = builder
        .send()
        .await
        .map_err(|err| FetchError::from_reqwest(err, &request.url))?;

    let status = response.status();
    let url = response.url().clone();
    let headers = response.headers().clone();
    let html = response
        .text()
        .await
        .map_err(|err| FetchError::from_reqwest(err, &request.url))?;

    if is_challenge(status, &headers, &html) {
        return Ok(Page::Challenge(Challenge {
            url,
            status,
            headers,
            html,
        }));
    }

    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status,
        });
    }

    Ok(Page::Content(ProtectedDocument {
        url: url.to_string(),
        status,
        headers,
        cookies: HashMap::new(),
        html,
    }))
}

fn collect_cookies(jar: &Jar, url: &str) -> HashMap<String, String> {
    let Some(header) = Url::parse(url).ok().and_then(|u| jar.cookies(&u)) else {
        return HashMap::new();
    };

    header
        .to_str()
        .unwrap_or_default()
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_owned(), value.to_owned()))
        })
        .collect()
}

pub async fn fetch(
    request: &PageFetchRequest,
    config: &FetchConfig,
) -> Result<ProtectedDocument, FetchError> {
    fetch_with(request, config, &InterstitialSolver).await
}

pub async fn fetch_with<S: ChallengeSolver>(
    request: &PageFetchRequest,
    config: &FetchConfig,
    solver: &S,
) -> Result<ProtectedDocument, FetchError> {
    let headers = config.merge_headers(&request.headers)?;
    let jar = Arc::new(Jar::default());
    let client = create_client_builder(config)
        .default_headers(headers)
        .cookie_provider(jar.clone())
        .build()
        .map_err(|err| FetchError::from_reqwest(err, &request.url))?;

    let challenge = match send(&client, request).await? {
        Page::Content(mut page) => {
            page.cookies = collect_cookies(&jar, &page.url);
            return Ok(page);
        }
        Page::Challenge(challenge) => challenge,
    };

    debug!(
        "[cloudflare] challenge detected for {} ({})",
        request.url, challenge.status
    );
    solver.solve(&client, &challenge, config).await?;

    match send(&client, request).await? {
        Page::Content(mut page) => {
            page.cookies = collect_cookies(&jar, &page.url);
            Ok(page)
        }
        Page::Challenge(challenge) => {
            warn!(
                "[cloudflare] still challenged after retry for {} ({})",
                request.url, challenge.status
            );
            Err(FetchError::ChallengeUnsolved {
                url: request.url.to_string(),
            })
        }
    }
}
