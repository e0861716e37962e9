//! `debughub://host:port?token=...` settings URL parsing.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    pub host: String,
    pub port: u16,
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsUrlError {
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),
    #[error("missing host")]
    MissingHost,
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("missing token query parameter")]
    MissingToken,
}

const SCHEME: &str = "debughub://";

/// Parse a `debughub://host:port?token=...` URL into [`HubSettings`].
pub fn parse(url: &str) -> Result<HubSettings, SettingsUrlError> {
    let rest = url
        .strip_prefix(SCHEME)
        .ok_or_else(|| SettingsUrlError::InvalidScheme(url.to_owned()))?;

    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let (host, port_str) = authority
        .split_once(':')
        .ok_or(SettingsUrlError::MissingHost)?;
    if host.is_empty() {
        return Err(SettingsUrlError::MissingHost);
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| SettingsUrlError::InvalidPort(port_str.to_owned()))?;

    let token = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|kv| kv.strip_prefix("token="))
        .ok_or(SettingsUrlError::MissingToken)?;

    Ok(HubSettings {
        host: host.to_owned(),
        port,
        token: token.to_owned(),
    })
}

/// Render [`HubSettings`] back into a settings URL.
pub fn format(settings: &HubSettings) -> String {
    format!(
        "{SCHEME}{}:{}?token={}",
        settings.host, settings.port, settings.token
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_url() {
        let settings = parse("debughub://localhost:9000?token=abc123").unwrap();
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.token, "abc123");
    }

    #[test]
    fn round_trips() {
        let settings = HubSettings {
            host: "10.0.0.5".to_owned(),
            port: 4242,
            token: "tok".to_owned(),
        };
        let url = format(&settings);
        let parsed = parse(&url).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(matches!(
            parse("http://localhost:9000?token=abc"),
            Err(SettingsUrlError::InvalidScheme(_))
        ));
    }

    #[test]
    fn rejects_missing_token() {
        assert!(matches!(
            parse("debughub://localhost:9000"),
            Err(SettingsUrlError::MissingToken)
        ));
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(matches!(
            parse("debughub://localhost:notaport?token=abc"),
            Err(SettingsUrlError::InvalidPort(_))
        ));
    }
}
