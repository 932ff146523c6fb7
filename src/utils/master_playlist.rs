use chrono::{DateTime, Utc};
use serde_json::Value;

use super::script_object::RepairedObject;

pub const TOKEN_FIELD: &str = "masterPlaylist.params.token";
pub const EXPIRES_FIELD: &str = "masterPlaylist.params.expires";
pub const URL_FIELD: &str = "masterPlaylist.url";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required field '{field}'")]
pub struct MissingFieldError {
    pub field: &'static str,
}

/// Where a site publishes the full HD permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FhdFlag {
    /// `window.canPlayFHD = true`
    #[default]
    TopLevel,
    /// `window.masterPlaylist = { canPlayFHD: true, ... }`
    InPlaylist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistParams {
    pub token: String,
    pub expires: String,
    pub base_url: String,
    pub can_play_fhd: bool,
}

// integral numbers only; non-integral ones count as absent
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_i64().map(|v| v.to_string())),
        _ => None,
    }
}

impl PlaylistParams {
    pub fn from_object(object: &RepairedObject, fhd: FhdFlag) -> Result<Self, MissingFieldError> {
        let playlist = object
            .get("masterPlaylist")
            .filter(|v| v.is_object())
            .ok_or(MissingFieldError {
                field: "masterPlaylist",
            })?;
        let params = playlist.get("params");

        let token = scalar(params.and_then(|p| p.get("token")))
            .ok_or(MissingFieldError { field: TOKEN_FIELD })?;
        let expires = scalar(params.and_then(|p| p.get("expires"))).ok_or(MissingFieldError {
            field: EXPIRES_FIELD,
        })?;
        let base_url = playlist
            .get("url")
            .and_then(Value::as_str)
            .ok_or(MissingFieldError { field: URL_FIELD })?
            .to_owned();

        let flag = match fhd {
            FhdFlag::TopLevel => object.get("canPlayFHD"),
            FhdFlag::InPlaylist => playlist.get("canPlayFHD"),
        };

        Ok(Self {
            token,
            expires,
            base_url,
            can_play_fhd: flag.and_then(Value::as_bool).unwrap_or(false),
        })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.expires.trim().parse().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn to_url(&self) -> String {
        let mut url = normalize_b_flag(&self.base_url);

        if !url.contains('?') {
            url.push('?');
        } else if !url.ends_with('?') && !url.ends_with('&') {
            url.push('&');
        }

        url.push_str("token=");
        url.extend(url::form_urlencoded::byte_serialize(self.token.as_bytes()));
        url.push_str("&expires=");
        url.extend(url::form_urlencoded::byte_serialize(self.expires.as_bytes()));

        if self.can_play_fhd {
            url.push_str("&h=1");
        }

        url
    }
}

/// Playlist urls sometimes carry `?b:1` (or a bare `?b`) instead of `?b=1`.
fn normalize_b_flag(base_url: &str) -> String {
    let Some(pos) = base_url.find("?b") else {
        return base_url.to_owned();
    };

    let (head, rest) = base_url.split_at(pos + 2);
    if let Some(tail) = rest.strip_prefix(":1") {
        format!("{head}=1{tail}")
    } else if rest.is_empty() || rest.starts_with('&') {
        format!("{head}=1{rest}")
    } else {
        base_url.to_owned()
    }
}

pub fn assemble(object: &RepairedObject, fhd: FhdFlag) -> Result<String, MissingFieldError> {
    Ok(PlaylistParams::from_object(object, fhd)?.to_url())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> RepairedObject {
        match value {
            Value::Object(map) => RepairedObject(map),
            _ => panic!("expected object"),
        }
    }

    fn playlist(url: &str, fhd: bool) -> RepairedObject {
        object(json!({
            "masterPlaylist": {
                "params": { "token": "abc", "expires": "123" },
                "url": url
            },
            "canPlayFHD": fhd
        }))
    }

    #[test]
    fn should_normalize_b_flag() {
        assert_eq!(
            "https://x/pl?b=1&token=abc&expires=123",
            assemble(&playlist("https://x/pl?b:1", false), FhdFlag::TopLevel).unwrap()
        );
    }

    #[test]
    fn should_append_query_and_fhd_flag() {
        assert_eq!(
            "https://x/pl?token=abc&expires=123&h=1",
            assemble(&playlist("https://x/pl", true), FhdFlag::TopLevel).unwrap()
        );
    }

    #[test]
    fn should_merge_with_existing_query() {
        assert_eq!(
            "https://x/pl?b=1&ub=1&token=abc&expires=123",
            assemble(&playlist("https://x/pl?b=1&ub=1", false), FhdFlag::TopLevel).unwrap()
        );
        assert_eq!(
            "https://x/pl?b=1&token=abc&expires=123",
            assemble(&playlist("https://x/pl?b", false), FhdFlag::TopLevel).unwrap()
        );
        assert_eq!(
            "https://x/pl?bar=2&token=abc&expires=123",
            assemble(&playlist("https://x/pl?bar=2", false), FhdFlag::TopLevel).unwrap()
        );
    }

    #[test]
    fn should_read_fhd_flag_from_playlist() {
        let obj = object(json!({
            "masterPlaylist": {
                "params": { "token": "abc", "expires": 123 },
                "url": "https://x/pl",
                "canPlayFHD": true
            }
        }));

        assert_eq!(
            "https://x/pl?token=abc&expires=123&h=1",
            assemble(&obj, FhdFlag::InPlaylist).unwrap()
        );
        assert_eq!(
            "https://x/pl?token=abc&expires=123",
            assemble(&obj, FhdFlag::TopLevel).unwrap()
        );
    }

    #[test]
    fn should_ignore_non_boolean_fhd_flag() {
        let mut obj = playlist("https://x/pl", false);
        obj.0.insert("canPlayFHD".into(), json!("true"));

        assert_eq!(
            "https://x/pl?token=abc&expires=123",
            assemble(&obj, FhdFlag::TopLevel).unwrap()
        );
    }

    #[test]
    fn should_encode_query_values() {
        let obj = object(json!({
            "masterPlaylist": {
                "params": { "token": "a+b/c=", "expires": "123" },
                "url": "https://x/pl"
            }
        }));

        assert_eq!(
            "https://x/pl?token=a%2Bb%2Fc%3D&expires=123",
            assemble(&obj, FhdFlag::TopLevel).unwrap()
        );
    }

    #[test]
    fn should_name_first_missing_field() {
        let cases = [
            (json!({ "canPlayFHD": true }), "masterPlaylist"),
            (json!({ "masterPlaylist": "url" }), "masterPlaylist"),
            (
                json!({ "masterPlaylist": { "params": { "expires": "1" }, "url": "u" } }),
                TOKEN_FIELD,
            ),
            (json!({ "masterPlaylist": { "url": "u" } }), TOKEN_FIELD),
            (
                json!({ "masterPlaylist": { "params": { "token": "t" }, "url": "u" } }),
                EXPIRES_FIELD,
            ),
            (
                json!({ "masterPlaylist": { "params": { "token": "t", "expires": "1" } } }),
                URL_FIELD,
            ),
        ];

        for (value, field) in cases {
            assert_eq!(
                Err(MissingFieldError { field }),
                assemble(&object(value), FhdFlag::TopLevel)
            );
        }
    }

    #[test]
    fn missing_token_error_names_token() {
        let err = assemble(
            &object(json!({ "masterPlaylist": { "params": { "expires": "1" }, "url": "u" } })),
            FhdFlag::TopLevel,
        )
        .unwrap_err();

        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn should_only_accept_integral_numbers() {
        let with_expires = |expires: Value| {
            object(json!({
                "masterPlaylist": {
                    "params": { "token": 42, "expires": expires },
                    "url": "https://x/pl"
                }
            }))
        };

        assert_eq!(
            Ok("https://x/pl?token=42&expires=1736000000".to_owned()),
            assemble(&with_expires(json!(1736000000u64)), FhdFlag::TopLevel)
        );
        assert_eq!(
            Err(MissingFieldError {
                field: EXPIRES_FIELD
            }),
            assemble(&with_expires(json!(1.736e21)), FhdFlag::TopLevel)
        );
        assert_eq!(
            Err(MissingFieldError {
                field: EXPIRES_FIELD
            }),
            assemble(&with_expires(json!(1736000000.5)), FhdFlag::TopLevel)
        );
    }

    #[test]
    fn should_parse_expiry() {
        let params = PlaylistParams::from_object(&playlist("u", false), FhdFlag::TopLevel).unwrap();
        assert_eq!(Some(123), params.expires_at().map(|d| d.timestamp()));
    }
}
