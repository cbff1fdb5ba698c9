//! dune-client: authenticated access to the Dune analytics query service.
//!
//! A [`DuneClient`] owns one [`Session`]. Each call refreshes the bearer
//! token, sends a payload built by `dune-interchange`, and decodes the
//! response. [`DuneClient::fetch`] upserts a query, executes it, polls until
//! a result exists and returns the decoded records, logging in again and
//! restarting when the service reports an error.

pub mod config;
mod dashboard;
mod engine;
mod error;
pub mod poll;
mod session;
pub mod transport;

pub use config::{ClientConfig, ConfigError, Credentials};
pub use dashboard::{export_config, refresh_all, Dashboard, DashboardError, DashboardSource};
pub use engine::{fetch_with_retries, DuneClient, Engine, JobPhase, QueryExecutor};
pub use error::DuneError;
pub use poll::{Clock, PollPolicy, Poller, SystemClock};
pub use session::{Authenticator, Session};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError, UreqTransport};
