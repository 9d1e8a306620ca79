//! Parsed broker endpoint URL.

use url::Url;

use crate::utils::RouterError;

/// Username assumed when the endpoint URL carries none.
pub const DEFAULT_USERNAME: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, RouterError> {
        let url = Url::parse(raw)
            .map_err(|e| RouterError::Configuration(format!("invalid broker URL: {e}")))?;
        if url.host_str().is_none() {
            return Err(RouterError::Configuration(
                "broker URL has no host".to_string(),
            ));
        }
        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Percent-decoded user info, `admin` when absent.
    pub fn username(&self) -> String {
        match self.url.username() {
            "" => DEFAULT_USERNAME.to_string(),
            user => decode(user),
        }
    }

    /// Percent-decoded password, if any.
    pub fn password(&self) -> Option<String> {
        self.url.password().map(decode)
    }

    /// The URL with its password masked, for logs.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
