use std::{collections::HashMap, time::Duration};

use crate::{
    extractors,
    models::PlayableLink,
    utils::{
        cloudflare::{self, PageFetchRequest},
        FetchConfig,
    },
};

/// Host side overrides for the fetch settings; unset fields keep the
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    pub user_agent: Option<String>,
    pub read_timeout_secs: Option<u64>,
    pub challenge_delay_millis: Option<u64>,
    pub cloudflare_dns: bool,
}

fn fetch_config(settings: Option<FetchSettings>) -> FetchConfig {
    let settings = settings.unwrap_or_default();
    let mut config = FetchConfig::default();
    if let Some(user_agent) = settings.user_agent {
        config = config.with_user_agent(user_agent);
    }
    if let Some(secs) = settings.read_timeout_secs {
        config = config.with_read_timeout(Duration::from_secs(secs));
    }
    if let Some(millis) = settings.challenge_delay_millis {
        config = config.with_challenge_delay(Duration::from_millis(millis));
    }
    if settings.cloudflare_dns {
        config = config.with_cloudflare_dns();
    }

    config
}

#[derive(Debug)]
pub struct LinkResolution {
    pub url: String,
    pub link: Option<PlayableLink>,
    pub error: Option<String>,
}

#[flutter_rust_bridge::frb(sync)]
pub fn avalaible_extractors() -> Vec<String> {
    extractors::avalaible_extractors()
}

pub async fn resolve_link(
    url: String,
    referer: Option<String>,
    settings: Option<FetchSettings>,
) -> anyhow::Result<PlayableLink> {
    let config = fetch_config(settings);
    Ok(extractors::resolve(&url, referer.as_deref(), &config).await?)
}

pub async fn resolve_links(
    urls: Vec<String>,
    referer: Option<String>,
    settings: Option<FetchSettings>,
) -> Vec<LinkResolution> {
    let config = fetch_config(settings);
    extractors::resolve_all(&urls, referer.as_deref(), &config)
        .await
        .into_iter()
        .map(|attempt| match attempt.result {
            Ok(link) => LinkResolution {
                url: attempt.url,
                link: Some(link),
                error: None,
            },
            Err(err) => LinkResolution {
                url: attempt.url,
                link: None,
                error: Some(err.to_string()),
            },
        })
        .collect()
}

/// Html of a page that may sit behind an anti-bot interstitial.
pub async fn fetch_protected_page(
    url: String,
    headers: HashMap<String, String>,
    timeout_secs: Option<u64>,
    settings: Option<FetchSettings>,
) -> anyhow::Result<String> {
    let mut request = PageFetchRequest::new(&url)?.headers(headers);
    if let Some(secs) = timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }

    let page = cloudflare::fetch(&request, &fetch_config(settings)).await?;
    Ok(page.html)
}

#[flutter_rust_bridge::frb(init)]
pub fn init_app() {
    flutter_rust_bridge::setup_default_user_utils();
    // the bridge may already own the logger
    let _ = env_logger::try_init();
}
