pub(crate) mod dashboard;
pub(crate) mod fetch;

use std::path::PathBuf;

use dune_client::{ClientConfig, Credentials, DuneClient};

use crate::OutputFormat;

pub(crate) type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Global flags shared by every subcommand.
pub(crate) struct Context {
    pub output: OutputFormat,
    pub quiet: bool,
    pub config: Option<PathBuf>,
}

impl Context {
    /// Load configuration and credentials, then log in.
    ///
    /// Credentials are checked before any request is made.
    pub(crate) fn connect(&self) -> Result<DuneClient, Box<dyn std::error::Error>> {
        let config = ClientConfig::load(self.config.as_deref())?;
        let credentials = Credentials::from_env()?;
        let mut client = DuneClient::new(&config, credentials);
        client.login()?;
        Ok(client)
    }

    /// Print a progress note to stderr unless `--quiet`.
    pub(crate) fn note(&self, msg: &str) {
        if !self.quiet && self.output == OutputFormat::Text {
            eprintln!("{}", msg);
        }
    }
}
