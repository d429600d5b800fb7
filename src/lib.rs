//! Obtain a Google Drive refresh token through the OAuth2 installed application flow.
//!
//! The token is printed for the operator to store in an environment variable
//! ([`DEFAULT_ENV_VAR`] by default) read by whatever service uploads to Drive. Nothing is
//! persisted by this crate.
//!
//! ```rust, no_run
//! use drive_refresh_token::{flow::InstalledFlow, obtain_refresh_token, DRIVE_FILE_SCOPE};
//!
//! let token = obtain_refresh_token(
//!     &InstalledFlow::default(),
//!     "client_secret.json",
//!     &[DRIVE_FILE_SCOPE.to_string()],
//! )?;
//! println!("{:?}", token);
//! # Ok::<(), drive_refresh_token::Error>(())
//! ```
use log::debug;
use std::path::{Path, PathBuf};

pub mod cli;
pub mod flow;
pub mod hook;
pub mod report;
pub mod secret;

use flow::{AuthFlowError, AuthorizationFlow};

/// Access limited to files created or opened by the application.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Environment variable the operator is told to put the token in.
pub const DEFAULT_ENV_VAR: &str = "ADMIN_DRIVE_REFRESH_TOKEN";

/// Errors for [`obtain_refresh_token`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot find file '{}'", .0.display())]
    MissingClientSecret(PathBuf),
    #[error(transparent)]
    Flow(#[from] AuthFlowError),
}

/// Run `flow` for the client described in `client_secret` and return the refresh token.
///
/// The file is only checked for existence here; `flow` is not invoked when it is absent.
/// `Ok(None)` means the flow succeeded but Google issued no refresh token, which happens
/// when an earlier consent is reused.
pub fn obtain_refresh_token<F>(
    flow: &F,
    client_secret: impl AsRef<Path>,
    scopes: &[String],
) -> Result<Option<String>, Error>
where
    F: AuthorizationFlow + ?Sized,
{
    let client_secret = client_secret.as_ref();
    if !client_secret.exists() {
        return Err(Error::MissingClientSecret(client_secret.to_owned()));
    }

    let credentials = flow.authorize(client_secret, scopes)?;
    debug!(
        "authorized, refresh token present: {}",
        credentials.refresh_token.is_some()
    );
    Ok(credentials.refresh_token.filter(|token| !token.is_empty()))
}
