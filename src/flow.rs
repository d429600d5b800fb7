//! The interactive authorization flow, behind the [`AuthorizationFlow`] seam.
use crate::{
    hook::{Credentials, HookError, InstalledAppHook},
    secret::{ApplicationSecret, SecretError},
};
use log::{debug, warn};
use std::path::Path;

/// Errors for [`AuthorizationFlow::authorize`]
#[derive(Debug, thiserror::Error)]
pub enum AuthFlowError {
    #[error(transparent)]
    SecretError(#[from] SecretError),
    #[error(transparent)]
    HookError(#[from] HookError),
    #[error("cannot build http client")]
    HttpClientError(#[from] reqwest::Error),
}

/// Something that can turn a client-secret file into user credentials.
pub trait AuthorizationFlow {
    fn authorize(
        &self,
        client_secret: &Path,
        scopes: &[String],
    ) -> Result<Credentials, AuthFlowError>;
}

/// Where the redirect server listens and whether to launch a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOptions {
    pub host: String,
    /// `0` lets the OS choose.
    pub port: u16,
    pub open_browser: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        FlowOptions {
            host: String::from("localhost"),
            port: 0,
            open_browser: true,
        }
    }
}

/// Google installed-application flow with a loopback redirect.
#[derive(Debug, Clone, Default)]
pub struct InstalledFlow {
    options: FlowOptions,
}

impl InstalledFlow {
    pub fn new(options: FlowOptions) -> Self {
        InstalledFlow { options }
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }
}

impl AuthorizationFlow for InstalledFlow {
    fn authorize(
        &self,
        client_secret: &Path,
        scopes: &[String],
    ) -> Result<Credentials, AuthFlowError> {
        let secret = ApplicationSecret::from_file(client_secret)?;
        debug!("loaded client {}", secret.client_id);

        let hook = InstalledAppHook::new(
            &secret,
            scopes.iter().cloned(),
            &self.options.host,
            self.options.port,
        )?;
        let (url, _) = hook.generate_url();
        println!(
            "Please visit this URL to authorize this application: {}",
            url.as_str()
        );
        if self.options.open_browser {
            if let Err(e) = open::that(url.as_str()) {
                warn!("could not open browser: {}", e);
            }
        }

        // NB: redirects must not be followed when talking to the token endpoint
        // https://docs.rs/oauth2/latest/oauth2/#security-warning
        let http_client = reqwest::blocking::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        hook.receive_auth_token(&http_client).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_an_os_assigned_port() {
        let options = FlowOptions::default();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 0);
        assert!(options.open_browser);
    }

    #[test]
    fn unreadable_secret_fails_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let flow = InstalledFlow::new(FlowOptions {
            open_browser: false,
            ..FlowOptions::default()
        });
        let err = flow
            .authorize(&dir.path().join("missing.json"), &[])
            .unwrap_err();
        assert!(matches!(err, AuthFlowError::SecretError(SecretError::Read(..))));
    }

    #[test]
    fn malformed_secret_is_a_flow_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"not json").unwrap();
        let flow = InstalledFlow::default();
        let err = flow.authorize(file.path(), &[]).unwrap_err();
        assert!(matches!(err, AuthFlowError::SecretError(SecretError::Parse(..))));
    }
}
