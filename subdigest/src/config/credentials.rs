//! Platform session cookies.

use std::fmt;
use std::path::Path;
use tracing::warn;

use crate::errors::Result;

/// Cookies sent to the video platform. Loaded from a `key=value` file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SourceCredentials {
    /// Session cookie; required for subtitles of most videos.
    pub sessdata: Option<String>,
    /// CSRF token.
    pub bili_jct: Option<String>,
    /// Device id cookie.
    pub buvid3: Option<String>,
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("sessdata", &self.sessdata.as_ref().map(|_| "<redacted>"))
            .field("bili_jct", &self.bili_jct.as_ref().map(|_| "<redacted>"))
            .field("buvid3", &self.buvid3)
            .finish()
    }
}

impl SourceCredentials {
    /// Parses `key=value` lines. Blank lines, `#` comments and unknown keys
    /// are ignored; keys are case-insensitive.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut creds = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "sessdata" => &mut creds.sessdata,
                "bili_jct" => &mut creds.bili_jct,
                "buvid3" => &mut creds.buvid3,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        creds
    }

    /// Loads credentials from a file. A missing file yields empty credentials.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Cookie file not found, continuing without login");
            return Ok(Self::default());
        }
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Returns true if a session cookie is present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.sessdata.is_some()
    }

    /// Renders the `Cookie` header value, if any cookie is set.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<String> = [
            ("SESSDATA", &self.sessdata),
            ("bili_jct", &self.bili_jct),
            ("buvid3", &self.buvid3),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| format!("{name}={v}")))
        .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}
