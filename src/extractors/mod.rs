mod vixcloud;
mod vixsrc;

pub use vixcloud::VixCloudExtractor;
pub use vixsrc::VixSrcExtractor;

use std::{collections::HashMap, str::FromStr};

use enum_dispatch::enum_dispatch;
use log::{debug, warn};
use strum::{IntoEnumIterator, VariantNames};
use strum_macros::{EnumIter, EnumString, VariantNames};

use crate::{
    models::{PlayableLink, Quality, StreamType},
    utils::{
        self,
        cloudflare::{self, FetchError, PageFetchRequest, ProtectedDocument},
        master_playlist::{FhdFlag, MissingFieldError, PlaylistParams},
        script_object::{self, ScriptError},
        FetchConfig,
    },
};

const PLAYLIST_MARKER: &str = "masterPlaylist";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    MissingField(#[from] MissingFieldError),
    #[error("no extractor supports {url}")]
    UnsupportedHost { url: String },
}

#[enum_dispatch]
pub trait LinkExtractor {
    fn name(&self) -> &'static str;
    fn matches(&self, host: &str) -> bool;
    async fn extract(
        &self,
        url: &str,
        referer: Option<&str>,
        config: &FetchConfig,
    ) -> Result<PlayableLink, ExtractError>;
}

#[enum_dispatch(LinkExtractor)]
#[derive(EnumIter, EnumString, VariantNames)]
pub enum AllExtractors {
    #[strum(serialize = "VixCloud")]
    VixCloudExtractor,
    #[strum(serialize = "VixSrc")]
    VixSrcExtractor,
}

pub fn avalaible_extractors() -> Vec<String> {
    AllExtractors::VARIANTS
        .iter()
        .map(|&s| s.to_owned())
        .collect()
}

pub fn get_extractor(name: &str) -> Result<AllExtractors, anyhow::Error> {
    AllExtractors::from_str(name).map_err(|err| err.into())
}

pub fn find_extractor(url: &str) -> Option<AllExtractors> {
    let host = utils::host_of(url)?;
    AllExtractors::iter().find(|extractor| extractor.matches(&host))
}

pub async fn resolve(
    url: &str,
    referer: Option<&str>,
    config: &FetchConfig,
) -> Result<PlayableLink, ExtractError> {
    let extractor = find_extractor(url).ok_or_else(|| ExtractError::UnsupportedHost {
        url: url.to_owned(),
    })?;

    debug!("[extractors] resolving {url} with {}", extractor.name());
    extractor.extract(url, referer, config).await
}

#[derive(Debug)]
pub struct LinkAttempt {
    pub url: String,
    pub result: Result<PlayableLink, ExtractError>,
}

/// Resolves every mirror concurrently. One attempt per input url, in input
/// order; a failing mirror does not affect the others.
pub async fn resolve_all(
    urls: &[String],
    referer: Option<&str>,
    config: &FetchConfig,
) -> Vec<LinkAttempt> {
    let attempts = urls.iter().map(|url| async move {
        let result = resolve(url, referer, config).await;
        if let Err(err) = &result {
            warn!("[extractors] failed to resolve {url}: {err}");
        }

        LinkAttempt {
            url: url.clone(),
            result,
        }
    });

    futures::future::join_all(attempts).await
}

/// Fetches a landing page and reads the playlist parameters from its marker
/// script.
pub(crate) async fn load_playlist_params(
    request: &PageFetchRequest,
    config: &FetchConfig,
    fhd: FhdFlag,
) -> Result<PlaylistParams, ExtractError> {
    let page = cloudflare::fetch(request, config).await?;
    parse_playlist_page(&page, fhd)
}

fn parse_playlist_page(
    page: &ProtectedDocument,
    fhd: FhdFlag,
) -> Result<PlaylistParams, ExtractError> {
    let script = script_object::extract_named_script(&page.document(), PLAYLIST_MARKER)?;
    let object = script_object::parse_assignments(&script)?;
    let params = PlaylistParams::from_object(&object, fhd)?;

    match params.expires_at() {
        Some(expires_at) if expires_at <= chrono::Utc::now() => {
            warn!("[extractors] playlist token for {} already expired at {expires_at}", page.url)
        }
        Some(expires_at) => debug!("[extractors] playlist token valid until {expires_at}"),
        None => debug!("[extractors] unparseable token expiry '{}'", params.expires),
    }

    Ok(params)
}

pub(crate) fn to_playable_link(
    params: &PlaylistParams,
    description: &str,
    headers: HashMap<String, String>,
) -> PlayableLink {
    let url = params.to_url();

    PlayableLink {
        stream_type: StreamType::from_url(&url),
        quality: if params.can_play_fhd {
            Quality::P1080
        } else {
            Quality::P720
        },
        description: description.to_owned(),
        headers,
        url,
    }
}

/// `host[:port]` of a landing url, used for `Host`/`Alt-Used` headers.
pub(crate) fn authority_of(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use reqwest::{header::HeaderMap, StatusCode};
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use super::*;

    pub const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>VixCloud</title></head>
<body>
  <script>
        window.video = {"id":"271485","name":"Film","duration":"120"};
        window.masterPlaylist = {
            params: {
                'token': 'aW5mbzp7fQ-tkn',
                'expires': '1736000000',
            },
            url: 'https://vixcloud.co/playlist/271485?b:1',
        }
        window.canPlayFHD = true
  </script>
</body>
</html>"#;

    fn page(html: &str) -> ProtectedDocument {
        ProtectedDocument {
            url: "https://vixcloud.co/embed/271485".into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cookies: HashMap::new(),
            html: html.into(),
        }
    }

    #[test]
    fn should_parse_playlist_page() {
        let params = parse_playlist_page(&page(LANDING_PAGE), FhdFlag::TopLevel).unwrap();

        assert_eq!(
            "https://vixcloud.co/playlist/271485?b=1&token=aW5mbzp7fQ-tkn&expires=1736000000&h=1",
            params.to_url()
        );
    }

    #[test]
    fn should_report_each_pipeline_failure() {
        let res = parse_playlist_page(&page("<html><body></body></html>"), FhdFlag::TopLevel);
        assert!(matches!(res, Err(ExtractError::Script(ScriptError::NotFound { .. }))));

        let res = parse_playlist_page(
            &page("<script>window.masterPlaylist = {url: 'x' +++</script>"),
            FhdFlag::TopLevel,
        );
        assert!(matches!(res, Err(ExtractError::Script(ScriptError::Malformed { .. }))));

        let res = parse_playlist_page(
            &page("<script>window.masterPlaylist = {url: 'https://x/pl'}</script>"),
            FhdFlag::TopLevel,
        );
        assert!(matches!(res, Err(ExtractError::MissingField(_))));
    }

    #[test]
    fn should_build_playable_link() {
        let params = PlaylistParams {
            token: "abc".into(),
            expires: "123".into(),
            base_url: "https://vixcloud.co/playlist/1?b=1".into(),
            can_play_fhd: false,
        };

        let link = to_playable_link(&params, "VixCloud", HashMap::new());

        assert_eq!("https://vixcloud.co/playlist/1?b=1&token=abc&expires=123", link.url);
        assert_eq!(StreamType::SegmentedPlaylist, link.stream_type);
        assert_eq!(Quality::P720, link.quality);
    }

    #[test]
    fn should_find_extractor_by_host() {
        assert_eq!(
            Some("VixCloud"),
            find_extractor("https://vixcloud.co/embed/1").map(|e| e.name())
        );
        assert_eq!(
            Some("VixSrc"),
            find_extractor("https://vixsrc.to/movie/550").map(|e| e.name())
        );
        assert!(find_extractor("https://dropload.tv/e/abc").is_none());
    }

    #[test]
    fn should_list_extractors() {
        assert_eq!(vec!["VixCloud", "VixSrc"], avalaible_extractors());
        assert_eq!("VixSrc", get_extractor("VixSrc").unwrap().name());
        assert!(get_extractor("Unknown").is_err());
    }

    #[test_log::test(tokio::test)]
    async fn should_apply_fetch_config_through_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(LANDING_PAGE)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let url = format!("{}/embed/271485", server.uri());
        let extractor = get_extractor("VixCloud").unwrap();

        let res = extractor
            .extract(
                &url,
                None,
                &FetchConfig::default().with_read_timeout(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(res, Err(ExtractError::Fetch(FetchError::Timeout { .. }))));

        let link = extractor
            .extract(&url, None, &FetchConfig::default())
            .await
            .unwrap();
        assert_eq!(Quality::P1080, link.quality);
    }

    #[test_log::test(tokio::test)]
    async fn should_report_failures_per_attempt() {
        let urls = vec![
            "https://dropload.tv/e/abc".to_owned(),
            "not a url".to_owned(),
        ];

        let attempts = resolve_all(&urls, None, &FetchConfig::default()).await;

        assert_eq!(2, attempts.len());
        assert_eq!(urls[0], attempts[0].url);
        assert_eq!(urls[1], attempts[1].url);
        assert!(attempts
            .iter()
            .all(|a| matches!(a.result, Err(ExtractError::UnsupportedHost { .. }))));
    }
}
