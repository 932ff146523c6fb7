use std::collections::HashMap;

use log::debug;

use super::{ExtractError, LinkExtractor};
use crate::{
    models::PlayableLink,
    utils::{cloudflare::PageFetchRequest, master_playlist::FhdFlag, FetchConfig},
};

const HOST: &str = "vixcloud.co";
const NAME: &str = "VixCloud";
const DESCRIPTION: &str = "Streaming Community - VixCloud";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0";

#[derive(Debug, Default, Clone, Copy)]
pub struct VixCloudExtractor;

impl LinkExtractor for VixCloudExtractor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, host: &str) -> bool {
        host == HOST || host.ends_with(".vixcloud.co")
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

fn request_headers(referer: Option<&str>) -> HashMap<String, String> {
    let mut headers = HashMap::from([
        ("Accept".to_owned(), "*/*".to_owned()),
        ("Connection".to_owned(), "keep-alive".to_owned()),
        ("Cache-Control".to_owned(), "no-cache".to_owned()),
        ("User-Agent".to_owned(), USER_AGENT.to_owned()),
    ]);

    if let Some(referer) = referer {
        headers.insert("Referer".to_owned(), referer.to_owned());
    }

    headers
}

pub async fn extract(
    url: &str,
    referer: Option<&str>,
    config: &FetchConfig,
) -> Result<PlayableLink, ExtractError> {
    debug!("[vixcloud] referer: {referer:?} url: {url}");

    let headers = request_headers(referer);
    let request = PageFetchRequest::new(url)?.headers(headers.clone());

    let params = super::load_playlist_params(&request, config, FhdFlag::TopLevel).await?;
    let link = super::to_playable_link(&params, DESCRIPTION, headers);

    debug!("[vixcloud] master playlist url: {}", link.url);
    Ok(link)
}
