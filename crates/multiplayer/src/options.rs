use url::Url;

use crate::Error;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "none"];
const MAX_Z_FACTOR: usize = 10;

/// Configuration for [`crate::Multiplayer::attach`].
///
/// Exactly one of `api_key` or `token_generation_url` must be set; which
/// is enforced by [`token::AuthMode::from_options`], not here, so the
/// two crates agree on one source of truth for that rule.
#[derive(Debug, Clone)]
pub struct MultiplayerOptions {
    /// Isolates this store's keys from every other store sharing the
    /// same remote service.
    pub namespace: String,
    /// Base URL of the remote key/value REST endpoint.
    pub api_base_url: Url,
    /// URL of the remote pubsub websocket endpoint.
    pub ws_url: Url,
    /// Direct-mode auth: sign tokens locally with this key.
    pub api_key: Option<String>,
    /// Indirect-mode auth: fetch tokens from this URL.
    pub token_generation_url: Option<Url>,
    /// Root fields of local state to keep in sync.
    pub sync: Vec<String>,
    /// Maximum path depth a single remote key may address before a
    /// deeper update falls back to whole-subtree replacement. Clamped
    /// to the 0-10 range rather than rejected out of range.
    pub z_factor: usize,
    /// Level passed to [`crate::init_tracing`], if the host opts into it.
    /// `"none"` disables logging entirely.
    pub log_level: String,
    /// Caps outbound writes to this many operations per second. `None`
    /// (or `Some(0)`, rejected below) means unthrottled.
    pub rate_limit: Option<u32>,
}

impl MultiplayerOptions {
    /// Validates the option set and normalizes values the spec defines
    /// as clamped rather than rejected (`zFactor`). Takes `&mut self`
    /// because of that normalization.
    pub(crate) fn validate(&mut self) -> Result<(), Error> {
        if self.namespace.trim().is_empty() {
            return Err(Error::Config("namespace must not be empty"));
        }
        if contains_forbidden_chars(&self.namespace) {
            return Err(Error::Config(
                "namespace must not contain control characters or < > \" \\",
            ));
        }
        if self.sync.is_empty() {
            return Err(Error::Config("sync must name at least one root field"));
        }
        check_scheme(&self.api_base_url, &["http", "https"], "apiBaseUrl")?;
        check_scheme(&self.ws_url, &["ws", "wss"], "wsUrl")?;

        self.z_factor = self.z_factor.min(MAX_Z_FACTOR);

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(
                "logLevel must be one of trace/debug/info/warn/error/none",
            ));
        }
        if self.rate_limit == Some(0) {
            return Err(Error::Config("rateLimit must be greater than zero when set"));
        }
        Ok(())
    }
}

fn contains_forbidden_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_control() || matches!(c, '<' | '>' | '"' | '\\'))
}

fn check_scheme(url: &Url, allowed: &[&str], field: &'static str) -> Result<(), Error> {
    if allowed.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(Error::Config(match field {
            "apiBaseUrl" => "apiBaseUrl must use http:// or https://",
            "wsUrl" => "wsUrl must use ws:// or wss://",
            _ => unreachable!(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> MultiplayerOptions {
        MultiplayerOptions {
            namespace: "todos-app".to_string(),
            api_base_url: Url::parse("https://api.example.com/store/").unwrap(),
            ws_url: Url::parse("wss://api.example.com/store/ws").unwrap(),
            api_key: Some("key".to_string()),
            token_generation_url: None,
            sync: vec!["todos".to_string()],
            z_factor: 2,
            log_level: "info".to_string(),
            rate_limit: None,
        }
    }

    #[test]
    fn rejects_empty_namespace() {
        let mut options = base_options();
        options.namespace = "  ".to_string();
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_namespace_with_forbidden_chars() {
        let mut options = base_options();
        options.namespace = "todos<script>".to_string();
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_empty_sync_list() {
        let mut options = base_options();
        options.sync = vec![];
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn clamps_z_factor_above_ten_instead_of_rejecting() {
        let mut options = base_options();
        options.z_factor = 50;
        options.validate().unwrap();
        assert_eq!(options.z_factor, 10);
    }

    #[test]
    fn accepts_zero_z_factor() {
        let mut options = base_options();
        options.z_factor = 0;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_unparseable_log_level() {
        let mut options = base_options();
        options.log_level = "verbose".to_string();
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn accepts_none_log_level() {
        let mut options = base_options();
        options.log_level = "NONE".to_string();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_zero_rate_limit() {
        let mut options = base_options();
        options.rate_limit = Some(0);
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_http_api_base_url() {
        let mut options = base_options();
        options.api_base_url = Url::parse("javascript:alert(1)").unwrap();
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_ws_url() {
        let mut options = base_options();
        options.ws_url = Url::parse("https://api.example.com/store/ws").unwrap();
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn accepts_well_formed_options() {
        assert!(base_options().validate().is_ok());
    }
}
