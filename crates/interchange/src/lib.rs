//! dune-interchange: wire-level types for the Dune analytics query service.
//!
//! Everything in this crate is pure: query definitions and their
//! parameters, the GraphQL-shaped request payloads sent to the service,
//! decoding of result envelopes into typed records, and the serde model of
//! the dashboard configuration document. Networking, session state and
//! retries live in `dune-client`.

pub mod dashboard;
pub mod decode;
pub mod payload;
pub mod types;

pub use dashboard::{DashboardConfig, DashboardMeta, ParameterEntry, QueryEntry};
pub use decode::{
    coerce_timestamp, decode_results, parse_metadata, parse_rows, read_envelope, require_fields,
    DecodeError, Envelope, QueryResults,
};
pub use payload::{Operation, Payload};
pub use types::*;
