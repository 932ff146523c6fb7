use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum StreamType {
    SegmentedPlaylist,
    SingleFile,
}

impl StreamType {
    /// Classifies a playable url. Anything that looks like an HLS manifest
    /// (`.m3u8` path or a `playlist` path segment) is segmented, the rest is
    /// treated as a single progressive file.
    pub fn from_url(url: &str) -> StreamType {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_owned())
            .unwrap_or_else(|_| {
                url.split(['?', '#'])
                    .next()
                    .unwrap_or_default()
                    .to_owned()
            });

        let is_playlist = path.ends_with(".m3u8")
            || path
                .split('/')
                .any(|segment| segment.eq_ignore_ascii_case("playlist"));

        if is_playlist {
            StreamType::SegmentedPlaylist
        } else {
            StreamType::SingleFile
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum Quality {
    Unknown,
    P720,
    P1080,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayableLink {
    pub url: String,
    pub description: String,
    pub headers: HashMap<String, String>,
    pub stream_type: StreamType,
    pub quality: Quality,
}
