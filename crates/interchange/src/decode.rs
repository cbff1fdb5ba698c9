//! Decoding of response envelopes into metadata and typed records.
//!
//! The result envelope is checked against a strict allow-list of top-level
//! keys. Once the structure is accepted, decoding never fails on data
//! content: string fields that look like UTC timestamps become
//! [`Value::Timestamp`], everything else is kept as-is.

use std::collections::BTreeSet;
use std::fmt;

use time::{OffsetDateTime, PrimitiveDateTime};

use crate::types::{Record, ResultMetadata, Value};

const QUERY_RESULTS: &str = "query_results";
const RESULT_DATA: &str = "get_result_by_result_id";

/// Errors raised when a response does not have the expected structure.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The response body is neither an `errors` nor a `data` envelope.
    MissingData,
    /// The result envelope's top-level keys differ from the allow-list.
    UnexpectedKeys {
        unexpected: Vec<String>,
        missing: Vec<String>,
    },
    /// `query_results` is not a one-element list.
    UnexpectedQueryResults(serde_json::Value),
    /// `get_result_by_result_id` is not a zero-or-one-element list of rows.
    UnexpectedResultData(serde_json::Value),
    /// A metadata field is absent or has the wrong type.
    InvalidMetadata { field: String },
    /// A field required by the operation is absent from `data` or has the
    /// wrong type.
    MissingField { field: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingData => {
                write!(f, "response carries neither 'data' nor 'errors'")
            }
            DecodeError::UnexpectedKeys {
                unexpected,
                missing,
            } => {
                write!(f, "invalid keys {:?}", unexpected)?;
                if !missing.is_empty() {
                    write!(f, " (missing {:?})", missing)?;
                }
                Ok(())
            }
            DecodeError::UnexpectedQueryResults(v) => {
                write!(f, "unexpected query_results {}", v)
            }
            DecodeError::UnexpectedResultData(v) => {
                write!(f, "unexpected get_result_by_result_id {}", v)
            }
            DecodeError::InvalidMetadata { field } => {
                write!(f, "result metadata has invalid or missing field '{}'", field)
            }
            DecodeError::MissingField { field } => {
                write!(f, "response data has missing or invalid field '{}'", field)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ── Envelope ────────────────────────────────────────────────────────

/// The two shapes a response body can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The `data` member of a successful response.
    Data(serde_json::Value),
    /// The `errors` member of a failed response.
    Errors(serde_json::Value),
}

/// Split a response body into its `errors` or `data` member.
///
/// Application-level failures are signalled by a top-level `errors` key,
/// independent of the HTTP status.
pub fn read_envelope(body: &serde_json::Value) -> Result<Envelope, DecodeError> {
    if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
        return Ok(Envelope::Errors(errors.clone()));
    }
    match body.get("data") {
        Some(data) if data.is_object() => Ok(Envelope::Data(data.clone())),
        _ => Err(DecodeError::MissingData),
    }
}

/// Check that every key in `keys` is present in `data`.
pub fn require_fields(data: &serde_json::Value, keys: &[&str]) -> Result<(), DecodeError> {
    for key in keys {
        if data.get(*key).is_none() {
            return Err(DecodeError::MissingField {
                field: (*key).to_string(),
            });
        }
    }
    Ok(())
}

// ── Result envelope ─────────────────────────────────────────────────

/// Metadata and rows of one completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResults {
    pub metadata: ResultMetadata,
    pub records: Vec<Record>,
}

/// Decode both metadata and rows from a result envelope.
pub fn decode_results(data: &serde_json::Value) -> Result<QueryResults, DecodeError> {
    Ok(QueryResults {
        metadata: parse_metadata(data)?,
        records: parse_rows(data)?,
    })
}

/// Parse the `query_results` entry of a result envelope.
pub fn parse_metadata(data: &serde_json::Value) -> Result<ResultMetadata, DecodeError> {
    check_key_set(data)?;
    let entry = match data.get(QUERY_RESULTS).and_then(|v| v.as_array()) {
        Some(list) if list.len() == 1 => &list[0],
        _ => {
            return Err(DecodeError::UnexpectedQueryResults(
                data.get(QUERY_RESULTS).cloned().unwrap_or_default(),
            ))
        }
    };

    let error = match entry.get("error") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let columns = entry
        .get("columns")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid_metadata("columns"))?
        .iter()
        .map(|c| c.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| invalid_metadata("columns"))?;

    let generated_at = entry
        .get("generated_at")
        .and_then(|v| v.as_str())
        .and_then(|s| {
            OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok()
        })
        .ok_or_else(|| invalid_metadata("generated_at"))?;

    Ok(ResultMetadata {
        id: metadata_str(entry, "id")?,
        job_id: metadata_str(entry, "job_id")?,
        error,
        runtime: entry
            .get("runtime")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| invalid_metadata("runtime"))?,
        generated_at,
        columns,
    })
}

/// Flatten the rows of a result envelope into records.
///
/// Zero rows is a legal outcome and yields an empty list.
pub fn parse_rows(data: &serde_json::Value) -> Result<Vec<Record>, DecodeError> {
    check_key_set(data)?;
    let raw = data.get(RESULT_DATA).cloned().unwrap_or_default();
    let entries = match raw.as_array() {
        Some(list) if list.len() <= 1 => list,
        _ => return Err(DecodeError::UnexpectedResultData(raw.clone())),
    };

    let Some(entry) = entries.first() else {
        return Ok(Vec::new());
    };

    match entry.get("data") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Object(row)) => Ok(vec![to_record(row)]),
        Some(serde_json::Value::Array(rows)) => rows
            .iter()
            .map(|row| {
                row.as_object()
                    .map(to_record)
                    .ok_or_else(|| DecodeError::UnexpectedResultData(raw.clone()))
            })
            .collect(),
        Some(_) => Err(DecodeError::UnexpectedResultData(raw.clone())),
    }
}

/// Try to read `s` as a `YYYY-MM-DDTHH:MM:SS+00:00` UTC timestamp.
pub fn coerce_timestamp(s: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(s, ROW_TIMESTAMP)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

const ROW_TIMESTAMP: &[time::format_description::FormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]+00:00");

fn to_record(row: &serde_json::Map<String, serde_json::Value>) -> Record {
    row.iter()
        .map(|(column, value)| (column.clone(), coerce_field(value)))
        .collect()
}

fn coerce_field(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::String(s) => match coerce_timestamp(s) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Text(s.clone()),
        },
        other => Value::from(other.clone()),
    }
}

fn check_key_set(data: &serde_json::Value) -> Result<(), DecodeError> {
    let allowed: BTreeSet<&str> = [QUERY_RESULTS, RESULT_DATA].into_iter().collect();
    let present: BTreeSet<&str> = data
        .as_object()
        .map(|obj| obj.keys().map(String::as_str).collect())
        .unwrap_or_default();

    if present == allowed {
        return Ok(());
    }
    Err(DecodeError::UnexpectedKeys {
        unexpected: present
            .difference(&allowed)
            .map(|k| k.to_string())
            .collect(),
        missing: allowed
            .difference(&present)
            .map(|k| k.to_string())
            .collect(),
    })
}

fn metadata_str(entry: &serde_json::Value, field: &str) -> Result<String, DecodeError> {
    entry
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| invalid_metadata(field))
}

fn invalid_metadata(field: &str) -> DecodeError {
    DecodeError::InvalidMetadata {
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn metadata_content() -> serde_json::Value {
        json!({
            "id": "3158cc2c-5ed1-4779-b523-eeb9c3b34b21",
            "job_id": "093e440d-66ce-4c00-81ec-2406f0403bc0",
            "error": null,
            "runtime": 0,
            "generated_at": "2022-03-19T07:11:37.344998+00:00",
            "columns": ["number", "size", "time", "block_hash", "tx_fees"],
            "__typename": "query_results"
        })
    }

    fn envelope(rows: serde_json::Value) -> serde_json::Value {
        json!({
            "query_results": [metadata_content()],
            "get_result_by_result_id": rows,
        })
    }

    #[test]
    fn metadata_is_parsed_and_typename_ignored() {
        let meta = parse_metadata(&envelope(json!([]))).unwrap();
        assert_eq!(meta.id, "3158cc2c-5ed1-4779-b523-eeb9c3b34b21");
        assert_eq!(meta.job_id, "093e440d-66ce-4c00-81ec-2406f0403bc0");
        assert_eq!(meta.error, None);
        assert_eq!(meta.runtime, 0.0);
        assert_eq!(meta.columns.len(), 5);
        assert_eq!(meta.columns[2], "time");
        assert_eq!(meta.generated_at.date(), time::macros::date!(2022-03-19));
    }

    #[test]
    fn metadata_error_is_surfaced() {
        let mut content = metadata_content();
        content["error"] = json!("column \"x\" does not exist");
        let data = json!({"query_results": [content], "get_result_by_result_id": []});
        let meta = parse_metadata(&data).unwrap();
        assert_eq!(meta.error.as_deref(), Some("column \"x\" does not exist"));
    }

    #[test]
    fn zero_rows_is_empty_not_error() {
        assert_eq!(parse_rows(&envelope(json!([]))).unwrap(), Vec::<Record>::new());
        assert!(decode_results(&envelope(json!([]))).unwrap().records.is_empty());
    }

    #[test]
    fn unexpected_keys_are_named() {
        let err = parse_rows(&json!({"a": [{}]})).unwrap_err();
        match &err {
            DecodeError::UnexpectedKeys { unexpected, .. } => {
                assert_eq!(unexpected, &vec!["a".to_string()]);
            }
            other => panic!("expected UnexpectedKeys, got {:?}", other),
        }
        assert!(err.to_string().starts_with("invalid keys [\"a\"]"));

        let err = parse_metadata(&json!({"query_results": [metadata_content()]})).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedKeys {
                unexpected: vec![],
                missing: vec!["get_result_by_result_id".to_string()],
            }
        );
    }

    #[test]
    fn query_results_must_have_one_entry() {
        let data = json!({
            "query_results": [metadata_content(), {}],
            "get_result_by_result_id": [],
        });
        let err = parse_metadata(&data).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedQueryResults(_)));
        assert!(err.to_string().starts_with("unexpected query_results"));
    }

    #[test]
    fn result_data_must_have_at_most_one_entry() {
        let data = envelope(json!([{"data": []}, {"data": []}]));
        assert!(matches!(
            parse_rows(&data),
            Err(DecodeError::UnexpectedResultData(_))
        ));
    }

    #[test]
    fn rows_are_flattened_with_timestamp_coercion() {
        let data = envelope(json!([{
            "data": [
                {"number": 1, "time": "1985-03-10T05:00:00+00:00", "block_hash": "0xab"},
                {"number": 2, "time": "not-a-date", "block_hash": null},
            ]
        }]));
        let rows = parse_rows(&data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["number"].as_i64(), Some(1));
        assert_eq!(
            rows[0]["time"],
            Value::Timestamp(datetime!(1985-03-10 05:00:00 UTC))
        );
        assert_eq!(rows[0]["block_hash"], Value::Text("0xab".to_string()));
        assert_eq!(rows[1]["time"], Value::Text("not-a-date".to_string()));
        assert!(rows[1]["block_hash"].is_null());
    }

    #[test]
    fn single_row_object_becomes_one_record() {
        let rows = parse_rows(&envelope(json!([{"data": {"col1": 1, "col2": 2}}]))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["col2"].as_i64(), Some(2));
    }

    #[test]
    fn coerce_timestamp_is_opportunistic() {
        assert_eq!(
            coerce_timestamp("1985-03-10T05:00:00+00:00"),
            Some(datetime!(1985-03-10 05:00:00 UTC))
        );
        assert_eq!(coerce_timestamp("not-a-date"), None);
        assert_eq!(coerce_timestamp("1985/03/10 - literally anything else"), None);
        assert_eq!(coerce_timestamp("2022-03-19T07:11:37.344998+00:00"), None);
    }

    #[test]
    fn envelope_prefers_errors() {
        let body = json!({"errors": [{"message": "JWTExpired"}], "data": null});
        assert_eq!(
            read_envelope(&body).unwrap(),
            Envelope::Errors(json!([{"message": "JWTExpired"}]))
        );

        let body = json!({"data": {"get_result": {"result_id": null}}});
        assert!(matches!(read_envelope(&body), Ok(Envelope::Data(_))));

        assert_eq!(read_envelope(&json!({})), Err(DecodeError::MissingData));
    }

    #[test]
    fn require_fields_reports_first_missing() {
        let data = json!({"execute_query": {"job_id": "x"}});
        assert!(require_fields(&data, &["execute_query"]).is_ok());
        assert_eq!(
            require_fields(&data, &["get_result"]),
            Err(DecodeError::MissingField {
                field: "get_result".to_string()
            })
        );
    }
}
