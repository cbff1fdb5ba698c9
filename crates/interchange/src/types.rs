//! Query definitions and result values exchanged with the service.
//!
//! A [`Query`] is immutable value data: it is built once, handed to the
//! engine, and never mutated. Result rows come back as [`Record`]s whose
//! fields are [`Value`]s.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::{OffsetDateTime, PrimitiveDateTime};

// ── Network ─────────────────────────────────────────────────────────

/// The dataset a query executes against.
///
/// The service identifies datasets by a small integer (`dataset_id`);
/// configuration documents use the lower-case variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Solana,
    Mainnet,
    Gchain,
    Polygon,
    OptimismV1,
    Binance,
    OptimismV2,
}

impl Network {
    /// All known networks, in `dataset_id` order.
    pub const ALL: [Network; 7] = [
        Network::Solana,
        Network::Mainnet,
        Network::Gchain,
        Network::Polygon,
        Network::OptimismV1,
        Network::Binance,
        Network::OptimismV2,
    ];

    /// Numeric dataset identifier used on the wire.
    pub fn dataset_id(self) -> u32 {
        match self {
            Network::Solana => 1,
            Network::Mainnet => 4,
            Network::Gchain => 6,
            Network::Polygon => 7,
            Network::OptimismV1 => 8,
            Network::Binance => 9,
            Network::OptimismV2 => 10,
        }
    }

    /// Inverse of [`Network::dataset_id`].
    pub fn from_dataset_id(id: u64) -> Option<Network> {
        Network::ALL
            .into_iter()
            .find(|n| u64::from(n.dataset_id()) == id)
    }

    /// Configuration name (`mainnet`, `gchain`, `optimism_v1`, ...).
    pub fn config_name(self) -> &'static str {
        match self {
            Network::Solana => "solana",
            Network::Mainnet => "mainnet",
            Network::Gchain => "gchain",
            Network::Polygon => "polygon",
            Network::OptimismV1 => "optimism_v1",
            Network::Binance => "binance",
            Network::OptimismV2 => "optimism_v2",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Network::Solana => "Solana",
            Network::Mainnet => "Ethereum mainnet",
            Network::Gchain => "Gnosis chain",
            Network::Polygon => "Polygon",
            Network::OptimismV1 => "Optimism (OVM1)",
            Network::Binance => "Binance Smart Chain",
            Network::OptimismV2 => "Optimism (OVM2)",
        };
        f.write_str(label)
    }
}

impl FromStr for Network {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Network::ALL
            .into_iter()
            .find(|n| n.config_name() == wanted)
            .ok_or_else(|| ParameterError::UnknownNetwork {
                name: s.to_string(),
            })
    }
}

// ── Query parameters ────────────────────────────────────────────────

/// Declared type of a query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Text,
    Number,
    Datetime,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::Text => "text",
            ParameterType::Number => "number",
            ParameterType::Datetime => "datetime",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterType {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ParameterType::Text),
            "number" => Ok(ParameterType::Number),
            "datetime" => Ok(ParameterType::Datetime),
            other => Err(ParameterError::UnknownType {
                type_name: other.to_string(),
            }),
        }
    }
}

/// Errors raised while building parameters or networks from untyped input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// The declared type is not one of `text`, `number`, `datetime`.
    UnknownType { type_name: String },
    /// The value cannot be represented as the declared type.
    InvalidValue {
        key: String,
        kind: ParameterType,
        value: String,
    },
    /// The network name is not recognised.
    UnknownNetwork { name: String },
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::UnknownType { type_name } => {
                write!(f, "unknown parameter type '{}'", type_name)
            }
            ParameterError::InvalidValue { key, kind, value } => {
                write!(f, "parameter '{}': '{}' is not a valid {}", key, value, kind)
            }
            ParameterError::UnknownNetwork { name } => {
                write!(f, "unknown network '{}'", name)
            }
        }
    }
}

impl std::error::Error for ParameterError {}

/// A typed key/value pair bound into a query definition.
///
/// The value is always carried as a string on the wire; the declared type
/// only decides how it was formatted (numbers as decimal text, datetimes as
/// `YYYY-MM-DD HH:MM:SS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParameter {
    key: String,
    #[serde(rename = "type")]
    kind: ParameterType,
    value: String,
}

impl QueryParameter {
    pub fn text_type(key: impl Into<String>, value: impl Into<String>) -> Self {
        QueryParameter {
            key: key.into(),
            kind: ParameterType::Text,
            value: value.into(),
        }
    }

    pub fn number_type(key: impl Into<String>, value: impl Into<serde_json::Number>) -> Self {
        QueryParameter {
            key: key.into(),
            kind: ParameterType::Number,
            value: value.into().to_string(),
        }
    }

    pub fn date_type(key: impl Into<String>, value: PrimitiveDateTime) -> Self {
        QueryParameter {
            key: key.into(),
            kind: ParameterType::Datetime,
            value: format_datetime(value),
        }
    }

    /// Build a parameter from an untyped JSON value, validating it against
    /// the declared type. Numbers may arrive as JSON numbers or numeric text.
    pub fn parse(
        key: &str,
        kind: ParameterType,
        raw: &serde_json::Value,
    ) -> Result<Self, ParameterError> {
        let invalid = || ParameterError::InvalidValue {
            key: key.to_string(),
            kind,
            value: raw.to_string(),
        };

        match (kind, raw) {
            (ParameterType::Text, serde_json::Value::String(s)) => Ok(Self::text_type(key, s.as_str())),
            (ParameterType::Text, serde_json::Value::Number(n)) => {
                Ok(Self::text_type(key, n.to_string()))
            }
            (ParameterType::Number, serde_json::Value::Number(n)) => {
                Ok(Self::number_type(key, n.clone()))
            }
            (ParameterType::Number, serde_json::Value::String(s)) => {
                let number = s
                    .trim()
                    .parse::<serde_json::Number>()
                    .map_err(|_| invalid())?;
                Ok(Self::number_type(key, number))
            }
            (ParameterType::Datetime, serde_json::Value::String(s)) => {
                let parsed = PrimitiveDateTime::parse(s.trim(), PARAMETER_DATETIME)
                    .map_err(|_| invalid())?;
                Ok(Self::date_type(key, parsed))
            }
            _ => Err(invalid()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    /// The wire representation of the value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// `{"key": .., "type": .., "value": ..}` as sent to the service.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "key": self.key,
            "type": self.kind.as_str(),
            "value": self.value,
        })
    }
}

const PARAMETER_DATETIME: &[time::format_description::FormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

fn format_datetime(dt: PrimitiveDateTime) -> String {
    dt.format(PARAMETER_DATETIME)
        .unwrap_or_else(|_| dt.to_string())
}

// ── Query ───────────────────────────────────────────────────────────

/// A query definition: the unit the engine upserts and executes.
///
/// `query_id` is either assigned by the service or chosen by the caller for
/// an upsert; it never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    query_id: u64,
    name: String,
    raw_sql: String,
    network: Network,
    parameters: Vec<QueryParameter>,
}

impl Query {
    pub fn new(
        query_id: u64,
        name: impl Into<String>,
        raw_sql: impl Into<String>,
        network: Network,
    ) -> Self {
        Query {
            query_id,
            name: name.into(),
            raw_sql: raw_sql.into(),
            network,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<QueryParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_sql(&self) -> &str {
        &self.raw_sql
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }

    /// File-system friendly name: lower-cased, spaces replaced by hyphens.
    pub fn file_stem(&self) -> String {
        slugify(&self.name)
    }
}

/// Lower-case `name` and reduce it to a single path component: ASCII
/// letters, digits, `-` and `_` are kept, everything else becomes `-`.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect();
    if slug.is_empty() {
        return "query".to_string();
    }
    slug
}

// ── Result values ───────────────────────────────────────────────────

/// A single field of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// A string field that parsed as a UTC timestamp.
    Timestamp(OffsetDateTime),
    /// Nested arrays and objects are passed through untouched.
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => {
                let text = ts
                    .format(&time::format_description::well_known::Rfc3339)
                    .map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&text)
            }
            Value::Json(v) => v.serialize(serializer),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(ts) => match ts.format(&time::format_description::well_known::Rfc3339) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "{:?}", ts),
            },
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// One result row: column name to value.
pub type Record = BTreeMap<String, Value>;

/// Metadata of a completed job, read from the result envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMetadata {
    pub id: String,
    pub job_id: String,
    /// `None` means the job succeeded.
    pub error: Option<String>,
    pub runtime: f64,
    pub generated_at: OffsetDateTime,
    /// Column names in result order.
    pub columns: Vec<String>,
}
