pub mod cloudflare;
mod doh;
pub mod master_playlist;
pub mod script_object;

use std::{collections::HashMap, time::Duration};

use doh::DoHResolver;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    ClientBuilder,
};

pub fn get_user_agent<'a>() -> &'a str {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0"
}

pub fn get_default_headers() -> HeaderMap {
    let mut headers = HeaderMap::default();

    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("it-IT,it;q=0.8,en-US;q=0.5,en;q=0.3"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
}

/// Immutable settings for a single protected fetch. Every call builds its own
/// client from it, so nothing (cookies, headers, resolver cache) leaks between
/// resolutions.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub default_headers: HeaderMap,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub challenge_delay: Duration,
    pub system_dns: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: get_user_agent().to_owned(),
            default_headers: get_default_headers(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            challenge_delay: Duration::ZERO,
            system_dns: true,
        }
    }
}

impl FetchConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_challenge_delay(mut self, delay: Duration) -> Self {
        self.challenge_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_cloudflare_dns(mut self) -> Self {
        self.system_dns = false;
        self
    }

    /// Defaults first, then caller headers on top: on a name collision the
    /// caller wins.
    pub fn merge_headers(
        &self,
        overrides: &HashMap<String, String>,
    ) -> Result<HeaderMap, InvalidHeader> {
        let mut headers = self.default_headers.clone();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| InvalidHeader(header::USER_AGENT.to_string()))?,
        );

        for (name, value) in overrides {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value).map_err(|_| InvalidHeader(name.to_string()))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid header: {0}")]
pub struct InvalidHeader(pub String);

pub fn create_client_builder(config: &FetchConfig) -> ClientBuilder {
    ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(config.user_agent.as_str())
        .danger_accept_invalid_certs(true)
        .dns_resolver(DoHResolver::new(config.system_dns).into_shared())
}

pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_headers_take_precedence() {
        let config = FetchConfig::default();
        let headers = config
            .merge_headers(&HashMap::from([
                ("Accept".to_owned(), "*/*".to_owned()),
                ("User-Agent".to_owned(), "custom".to_owned()),
                ("Referer".to_owned(), "https://example.com/".to_owned()),
            ]))
            .unwrap();

        assert_eq!("*/*", headers[header::ACCEPT]);
        assert_eq!("custom", headers[header::USER_AGENT]);
        assert_eq!("https://example.com/", headers[header::REFERER]);
        assert_eq!("no-cache", headers[header::CACHE_CONTROL]);
    }

    #[test]
    fn should_build_config() {
        let config = FetchConfig::default()
            .with_user_agent("agent/1.0")
            .with_read_timeout(Duration::from_secs(3))
            .with_challenge_delay(Duration::from_millis(4000))
            .with_cloudflare_dns();

        assert_eq!("agent/1.0", config.user_agent);
        assert_eq!(Duration::from_secs(3), config.read_timeout);
        assert_eq!(Duration::from_secs(4), config.challenge_delay);
        assert!(!config.system_dns);
        assert_eq!(Duration::from_secs(5), config.connect_timeout);

        let headers = config.merge_headers(&HashMap::new()).unwrap();
        assert_eq!("agent/1.0", headers[header::USER_AGENT]);
    }

    #[test]
    fn should_reject_invalid_header_value() {
        let res = FetchConfig::default()
            .merge_headers(&HashMap::from([("Referer".to_owned(), "a\nb".to_owned())]));

        assert_eq!(Err(InvalidHeader("referer".to_owned())), res);
    }

    #[test]
    fn should_extract_host() {
        assert_eq!(
            Some("vixcloud.co".to_owned()),
            host_of("https://vixcloud.co/embed/1234?token=a")
        );
        assert_eq!(None, host_of("not a url"));
    }
}
