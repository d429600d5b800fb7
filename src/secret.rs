//! Google client-secret files, as downloaded from the Cloud console
//! ("OAuth 2.0 Client IDs" → "Download JSON").
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Errors while loading a client-secret file.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("cannot read client secret file {1}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("cannot parse client secret file {1}")]
    Parse(#[source] serde_json::Error, PathBuf),
    #[error("client secrets in {0} must be for a web or installed app")]
    UnsupportedClientType(PathBuf),
}

/// Client identity of an OAuth2 application registered with Google.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApplicationSecret {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Top-level layout of the downloaded file. Exactly one of the two
/// entries is expected, depending on the client type.
#[derive(Debug, Deserialize)]
struct ConsoleApplicationSecret {
    installed: Option<ApplicationSecret>,
    web: Option<ApplicationSecret>,
}

impl ApplicationSecret {
    /// Read a client-secret file, preferring the `installed` entry over `web`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SecretError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| SecretError::Read(e, path.to_owned()))?;
        Self::from_json(&contents, path)
    }

    fn from_json(contents: &str, path: &Path) -> Result<Self, SecretError> {
        let console: ConsoleApplicationSecret =
            serde_json::from_str(contents).map_err(|e| SecretError::Parse(e, path.to_owned()))?;
        console
            .installed
            .or(console.web)
            .ok_or_else(|| SecretError::UnsupportedClientType(path.to_owned()))
    }
}
