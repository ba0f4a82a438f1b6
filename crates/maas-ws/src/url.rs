//! Connection URL and upgrade credentials.

use maas_settings::WebSocketSettings;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{ClientError, Result};

/// Everything needed to open the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// `ws://` or `wss://` URL including the `csrftoken` query parameter.
    pub url: String,
    /// `Cookie` header for the upgrade request, if a session is configured.
    pub cookie: Option<String>,
}

/// Build the connection target from settings.
///
/// Fails with [`ClientError::MissingCredentials`] when no CSRF token is
/// configured; the server rejects such connections anyway.
pub fn build_target(settings: &WebSocketSettings) -> Result<ConnectionTarget> {
    let token = settings
        .csrf_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(ClientError::MissingCredentials)?;
    let encoded = utf8_percent_encode(token, NON_ALPHANUMERIC).to_string();

    let base = match &settings.url {
        Some(url) => url.clone(),
        None => {
            if settings.host.is_empty() {
                return Err(ClientError::InvalidUrl("no host configured".into()));
            }
            let scheme = if settings.tls { "wss" } else { "ws" };
            let port = settings.port.map(|p| format!(":{p}")).unwrap_or_default();
            let path = if settings.base_path.starts_with('/') {
                settings.base_path.clone()
            } else {
                format!("/{}", settings.base_path)
            };
            format!("{scheme}://{}{port}{path}", settings.host)
        }
    };

    if !(base.starts_with("ws://") || base.starts_with("wss://")) {
        return Err(ClientError::InvalidUrl(base));
    }

    let separator = if base.contains('?') { '&' } else { '?' };
    let url = format!("{base}{separator}csrftoken={encoded}");
    let cookie = settings
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|sid| format!("sessionid={sid}; csrftoken={token}"));

    Ok(ConnectionTarget { url, cookie })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings_with_token() -> WebSocketSettings {
        WebSocketSettings {
            csrf_token: Some("abc123".into()),
            ..WebSocketSettings::default()
        }
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = build_target(&WebSocketSettings::default()).unwrap_err();
        assert_matches!(err, ClientError::MissingCredentials);
    }

    #[test]
    fn empty_token_is_fatal() {
        let settings = WebSocketSettings {
            csrf_token: Some(String::new()),
            ..WebSocketSettings::default()
        };
        assert_matches!(build_target(&settings), Err(ClientError::MissingCredentials));
    }

    #[test]
    fn builds_from_parts() {
        let target = build_target(&settings_with_token()).unwrap();
        assert_eq!(target.url, "ws://localhost:5240/MAAS/ws?csrftoken=abc123");
        assert!(target.cookie.is_none());
    }

    #[test]
    fn tls_without_port() {
        let settings = WebSocketSettings {
            host: "maas.example".into(),
            port: None,
            tls: true,
            base_path: "MAAS/ws".into(),
            ..settings_with_token()
        };
        let target = build_target(&settings).unwrap();
        assert_eq!(target.url, "wss://maas.example/MAAS/ws?csrftoken=abc123");
    }

    #[test]
    fn explicit_url_keeps_query() {
        let settings = WebSocketSettings {
            url: Some("ws://10.0.0.1/ws?x=1".into()),
            ..settings_with_token()
        };
        let target = build_target(&settings).unwrap();
        assert_eq!(target.url, "ws://10.0.0.1/ws?x=1&csrftoken=abc123");
    }

    #[test]
    fn token_is_escaped() {
        let settings = WebSocketSettings {
            csrf_token: Some("a b&c".into()),
            ..WebSocketSettings::default()
        };
        let target = build_target(&settings).unwrap();
        assert!(target.url.ends_with("csrftoken=a%20b%26c"));
    }

    #[test]
    fn non_websocket_url_rejected() {
        let settings = WebSocketSettings {
            url: Some("http://example.com".into()),
            ..settings_with_token()
        };
        assert_matches!(build_target(&settings), Err(ClientError::InvalidUrl(_)));
    }

    #[test]
    fn session_cookie() {
        let settings = WebSocketSettings {
            session_id: Some("s1".into()),
            ..settings_with_token()
        };
        let target = build_target(&settings).unwrap();
        assert_eq!(target.cookie.as_deref(), Some("sessionid=s1; csrftoken=abc123"));
    }
}
