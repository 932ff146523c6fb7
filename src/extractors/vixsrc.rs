use std::collections::HashMap;

use log::debug;

use super::{authority_of, ExtractError, LinkExtractor};
use crate::{
    models::PlayableLink,
    utils::{cloudflare::PageFetchRequest, master_playlist::FhdFlag, FetchConfig},
};

const HOST: &str = "vixsrc.to";
const NAME: &str = "VixSrc";
const DEFAULT_REFERER: &str = "https://vixsrc.to/";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/133.0";
const HOST_BOUND_HEADERS: [&str; 2] = ["Host", "Alt-Used"];

#[derive(Debug, Default, Clone, Copy)]
pub struct VixSrcExtractor;

impl LinkExtractor for VixSrcExtractor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, host: &str) -> bool {
        host == HOST || host.ends_with(".vixsrc.to")
    }

    async fn extract(
        &self,
        url: &str,
        referer: Option<&str>,
        config: &FetchConfig,
    ) -> Result<PlayableLink, ExtractError> {
        extract(url, referer, config).await
    }
}

// the landing page only renders when requested as a cross-site iframe
fn request_headers(authority: &str, referer: &str) -> HashMap<String, String> {
    HashMap::from([
        ("Accept".to_owned(), "*/*".to_owned()),
        ("Alt-Used".to_owned(), authority.to_owned()),
        ("Connection".to_owned(), "keep-alive".to_owned()),
        ("Host".to_owned(), authority.to_owned()),
        ("Referer".to_owned(), referer.to_owned()),
        ("Sec-Fetch-Dest".to_owned(), "iframe".to_owned()),
        ("Sec-Fetch-Mode".to_owned(), "navigate".to_owned()),
        ("Sec-Fetch-Site".to_owned(), "cross-site".to_owned()),
        ("User-Agent".to_owned(), USER_AGENT.to_owned()),
    ])
}

pub async fn extract(
    url: &str,
    referer: Option<&str>,
    config: &FetchConfig,
) -> Result<PlayableLink, ExtractError> {
    let referer = referer.unwrap_or(DEFAULT_REFERER);
    let request = PageFetchRequest::new(url)?;
    let headers = request_headers(&authority_of(&request.url), referer);
    let request = request.headers(headers.clone());

    let params = super::load_playlist_params(&request, config, FhdFlag::TopLevel).await?;

    // the playlist is served by another host than the landing page
    let mut playback_headers = headers;
    for name in HOST_BOUND_HEADERS {
        playback_headers.remove(name);
    }
    let link = super::to_playable_link(&params, NAME, playback_headers);

    debug!("[vixsrc] master playlist url: {}", link.url);
    Ok(link)
}
