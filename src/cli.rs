//! Command line surface of the `drive-refresh-token` binary.
use crate::{
    flow::{AuthorizationFlow, FlowOptions},
    obtain_refresh_token, report, DEFAULT_ENV_VAR, DRIVE_FILE_SCOPE,
};
use clap::Parser;
use std::{io, path::PathBuf};

/// Printed when no client-secret file is given.
pub const USAGE: &str = "Usage: drive-refresh-token <client_secret_file.json>";

/// Obtain a Google Drive refresh token for unattended uploads.
#[derive(Debug, Clone, Parser)]
#[command(name = "drive-refresh-token", version, about)]
pub struct Cli {
    /// Client secret JSON downloaded from the Google Cloud console.
    pub client_secret: Option<PathBuf>,

    /// Host name used for the loopback redirect.
    #[arg(long, env = "DRIVE_REFRESH_TOKEN_HOST", default_value = "localhost")]
    pub host: String,

    /// Port for the loopback redirect, 0 picks a free one.
    #[arg(long, env = "DRIVE_REFRESH_TOKEN_PORT", default_value_t = 0)]
    pub port: u16,

    /// Only print the authorization URL.
    #[arg(long)]
    pub no_browser: bool,

    /// Scope to request; may be repeated.
    #[arg(long = "scope", default_value = DRIVE_FILE_SCOPE)]
    pub scopes: Vec<String>,

    /// Environment variable the token is meant for.
    #[arg(long, default_value = DEFAULT_ENV_VAR)]
    pub env_var: String,
}

impl Cli {
    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            host: self.host.clone(),
            port: self.port,
            open_browser: !self.no_browser,
        }
    }

    /// Run the flow and report on `out`.
    ///
    /// Only failing to write to `out` is an error; every outcome of the flow is reported.
    pub fn execute<F, W>(&self, flow: &F, out: &mut W) -> io::Result<()>
    where
        F: AuthorizationFlow + ?Sized,
        W: io::Write,
    {
        let Some(client_secret) = &self.client_secret else {
            return writeln!(out, "{}", USAGE);
        };
        let result = obtain_refresh_token(flow, client_secret, &self.scopes);
        report::write_report(out, &result, &self.env_var)
    }
}
