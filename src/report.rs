//! Operator-facing output.
use crate::Error;
use std::io::{self, Write};

const RULE_WIDTH: usize = 60;

/// Where to send the operator to revoke a previous grant.
pub const PERMISSIONS_URL: &str = "https://myaccount.google.com/permissions";

/// Write the outcome of [`obtain_refresh_token`](crate::obtain_refresh_token).
///
/// `env_var` is the variable the operator is told to store the token in.
pub fn write_report<W: Write>(
    out: &mut W,
    result: &Result<Option<String>, Error>,
    env_var: &str,
) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    match result {
        Ok(Some(token)) => {
            writeln!(out, "\n{}", rule)?;
            writeln!(out, "Refresh token obtained!")?;
            writeln!(
                out,
                "Copy the string below into the environment variable {}:",
                env_var
            )?;
            writeln!(out, "\n{}\n", token)?;
            writeln!(out, "{}", rule)
        }
        Ok(None) => {
            writeln!(out, "\n{}", rule)?;
            writeln!(out, "No refresh token was issued.")?;
            writeln!(
                out,
                "This usually means Google did not issue a new token for a previous consent."
            )?;
            writeln!(
                out,
                "Remove this application's access at {} and try again.",
                PERMISSIONS_URL
            )?;
            writeln!(out, "{}", rule)
        }
        Err(Error::MissingClientSecret(path)) => {
            writeln!(out, "Error: cannot find file '{}'", path.display())
        }
        Err(err @ Error::Flow(_)) => writeln!(
            out,
            "An error occurred during authorization: {}",
            error_chain(err)
        ),
    }
}

/// `err` and its sources, joined by `: `.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
