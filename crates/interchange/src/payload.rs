//! Request payloads for the service's GraphQL endpoint.
//!
//! Every builder is a pure function of its inputs. The GraphQL documents
//! themselves are opaque constants; only `operationName` and `variables`
//! vary per call.

use crate::types::Query;

/// The logical operations the client knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    UpsertQuery,
    ExecuteQuery,
    GetResult,
    FindResultDataByResult,
    FindDashboard,
}

impl Operation {
    /// Value of the `operationName` field.
    pub fn name(self) -> &'static str {
        match self {
            Operation::UpsertQuery => "UpsertQuery",
            Operation::ExecuteQuery => "ExecuteQuery",
            Operation::GetResult => "GetResult",
            Operation::FindResultDataByResult => "FindResultDataByResult",
            Operation::FindDashboard => "FindDashboard",
        }
    }

    /// Keys that must be present under `data` in a successful response.
    pub fn response_keys(self) -> &'static [&'static str] {
        match self {
            Operation::UpsertQuery => &["insert_queries_one"],
            Operation::ExecuteQuery => &["execute_query"],
            Operation::GetResult => &["get_result"],
            Operation::FindResultDataByResult => &["query_results", "get_result_by_result_id"],
            Operation::FindDashboard => &["dashboards"],
        }
    }

    fn document(self) -> &'static str {
        match self {
            Operation::UpsertQuery => UPSERT_QUERY,
            Operation::ExecuteQuery => EXECUTE_QUERY,
            Operation::GetResult => GET_RESULT,
            Operation::FindResultDataByResult => FIND_RESULT_DATA,
            Operation::FindDashboard => FIND_DASHBOARD,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A `{operationName, variables, query}` request body.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    operation_name: &'static str,
    variables: serde_json::Value,
    query: &'static str,
    operation: Operation,
}

impl Payload {
    fn new(operation: Operation, variables: serde_json::Value) -> Self {
        Payload {
            operation_name: operation.name(),
            variables,
            query: operation.document(),
            operation,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn variables(&self) -> &serde_json::Value {
        &self.variables
    }

    pub fn document(&self) -> &str {
        self.query
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "operationName": self.operation_name,
            "variables": self.variables,
            "query": self.query,
        })
    }

    /// Create-or-update the definition of `query`, keyed by its `query_id`.
    pub fn upsert_query(query: &Query) -> Self {
        let parameters: Vec<serde_json::Value> =
            query.parameters().iter().map(|p| p.to_json()).collect();

        let object = serde_json::json!({
            "id": query.query_id(),
            "schedule": null,
            "dataset_id": query.network().dataset_id(),
            "name": query.name(),
            "query": query.raw_sql(),
            "description": "",
            "is_archived": false,
            "is_temp": false,
            "tags": [],
            "parameters": parameters,
            "visualizations": {
                "data": [],
                "on_conflict": {
                    "constraint": "visualizations_pkey",
                    "update_columns": ["name", "options"],
                },
            },
        });

        Payload::new(
            Operation::UpsertQuery,
            serde_json::json!({
                "favs_last_24h": false,
                "favs_last_7d": false,
                "favs_last_30d": false,
                "favs_all_time": true,
                "object": object,
                "on_conflict": {
                    "constraint": "queries_pkey",
                    "update_columns": [
                        "dataset_id",
                        "name",
                        "description",
                        "query",
                        "schedule",
                        "is_archived",
                        "is_temp",
                        "tags",
                        "parameters",
                    ],
                },
                // Must be an integer; the value itself is not inspected.
                "session_id": 0,
            }),
        )
    }

    /// Ask the service to run the stored definition of `query_id`.
    ///
    /// Parameters are bound when the definition is upserted, so the
    /// execute call always sends an empty list.
    pub fn execute(query_id: u64) -> Self {
        Payload::new(
            Operation::ExecuteQuery,
            serde_json::json!({ "query_id": query_id, "parameters": [] }),
        )
    }

    /// Latest job and result identifiers for `query_id`.
    pub fn get_result_id(query_id: u64) -> Self {
        Payload::new(
            Operation::GetResult,
            serde_json::json!({ "query_id": query_id }),
        )
    }

    /// Rows and metadata of a completed job.
    pub fn fetch_rows(result_id: &str) -> Self {
        Payload::new(
            Operation::FindResultDataByResult,
            serde_json::json!({ "result_id": result_id }),
        )
    }

    /// Dashboard definition owned by `owner` with the given `slug`.
    pub fn find_dashboard(owner: &str, slug: &str) -> Self {
        Payload::new(
            Operation::FindDashboard,
            serde_json::json!({ "user": owner, "slug": slug }),
        )
    }
}

const EXECUTE_QUERY: &str = r#"
mutation ExecuteQuery($query_id: Int!, $parameters: [Parameter!]!) {
  execute_query(query_id: $query_id, parameters: $parameters) {
    job_id
  }
}
"#;

const GET_RESULT: &str = r#"
query GetResult($query_id: Int!, $parameters: [Parameter!]) {
  get_result(query_id: $query_id, parameters: $parameters) {
    job_id
    result_id
  }
}
"#;

const FIND_RESULT_DATA: &str = r#"
query FindResultDataByResult($result_id: uuid!) {
  query_results(where: { id: { _eq: $result_id } }) {
    id
    job_id
    error
    runtime
    generated_at
    columns
  }
  get_result_by_result_id(args: { want_result_id: $result_id }) {
    data
  }
}
"#;

const FIND_DASHBOARD: &str = r#"
query FindDashboard($session_id: Int, $user: String!, $slug: String!) {
  dashboards(where: { slug: { _eq: $slug }, user: { name: { _eq: $user } } }) {
    id
    name
    slug
    user {
      name
    }
    visualization_widgets {
      visualization {
        query_details {
          query_id
          name
          query
          dataset_id
          parameters
        }
      }
    }
  }
}
"#;

const UPSERT_QUERY: &str = r#"
mutation UpsertQuery(
  $session_id: Int!
  $object: queries_insert_input!
  $on_conflict: queries_on_conflict!
  $favs_last_24h: Boolean! = false
  $favs_last_7d: Boolean! = false
  $favs_last_30d: Boolean! = false
  $favs_all_time: Boolean! = true
) {
  insert_queries_one(object: $object, on_conflict: $on_conflict) {
    ...Query
    favorite_queries(where: { user_id: { _eq: $session_id } }, limit: 1) {
      created_at
    }
  }
}
fragment Query on queries {
  ...BaseQuery
  ...QueryVisualizations
  ...QueryForked
  ...QueryUsers
  ...QueryFavorites
}
fragment BaseQuery on queries {
  id
  dataset_id
  name
  description
  query
  private_to_group_id
  is_temp
  is_archived
  created_at
  updated_at
  schedule
  tags
  parameters
}
fragment QueryVisualizations on queries {
  visualizations {
    id
    type
    name
    options
    created_at
  }
}
fragment QueryForked on queries {
  forked_query {
    id
    name
    user {
      name
    }
  }
}
fragment QueryUsers on queries {
  user {
    ...User
  }
}
fragment User on users {
  id
  name
  profile_image_url
}
fragment QueryFavorites on queries {
  query_favorite_count_all @include(if: $favs_all_time) {
    favorite_count
  }
  query_favorite_count_last_24h @include(if: $favs_last_24h) {
    favorite_count
  }
  query_favorite_count_last_7d @include(if: $favs_last_7d) {
    favorite_count
  }
  query_favorite_count_last_30d @include(if: $favs_last_30d) {
    favorite_count
  }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Network, QueryParameter};

    fn sample_query() -> Query {
        Query::new(
            533353,
            "Example 1",
            "select * from ethereum.blocks limit 5",
            Network::Gchain,
        )
    }

    #[test]
    fn upsert_echoes_query_fields() {
        let query = sample_query();
        let payload = Payload::upsert_query(&query);
        let object = &payload.variables()["object"];

        assert_eq!(payload.operation(), Operation::UpsertQuery);
        assert_eq!(object["id"], serde_json::json!(533353));
        assert_eq!(object["dataset_id"], serde_json::json!(6));
        assert_eq!(object["name"], serde_json::json!("Example 1"));
        assert_eq!(
            object["query"],
            serde_json::json!("select * from ethereum.blocks limit 5")
        );
        assert_eq!(object["parameters"], serde_json::json!([]));
        assert_eq!(object["tags"], serde_json::json!([]));
        assert_eq!(object["schedule"], serde_json::Value::Null);
        assert_eq!(object["is_archived"], serde_json::json!(false));
        assert_eq!(object["is_temp"], serde_json::json!(false));
    }

    #[test]
    fn upsert_embeds_serialized_parameters() {
        let query = sample_query().with_parameters(vec![QueryParameter::number_type("N", 7)]);
        let payload = Payload::upsert_query(&query);
        assert_eq!(
            payload.variables()["object"]["parameters"],
            serde_json::json!([{"key": "N", "type": "number", "value": "7"}])
        );
    }

    #[test]
    fn execute_never_carries_parameters() {
        let payload = Payload::execute(12);
        assert_eq!(
            payload.to_json()["variables"],
            serde_json::json!({"query_id": 12, "parameters": []})
        );
        assert_eq!(payload.to_json()["operationName"], "ExecuteQuery");
    }

    #[test]
    fn result_payloads_carry_their_identifiers() {
        assert_eq!(
            Payload::get_result_id(3).variables(),
            &serde_json::json!({"query_id": 3})
        );
        let fetch = Payload::fetch_rows("3158cc2c-5ed1-4779-b523-eeb9c3b34b21");
        assert_eq!(
            fetch.variables()["result_id"],
            "3158cc2c-5ed1-4779-b523-eeb9c3b34b21"
        );
        assert!(fetch.document().contains("get_result_by_result_id"));
    }

    #[test]
    fn body_has_exactly_the_graphql_fields() {
        let body = Payload::get_result_id(9).to_json();
        let mut keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["operationName", "query", "variables"]);
        assert_eq!(body["operationName"], "GetResult");
        assert_eq!(body["variables"], serde_json::json!({"query_id": 9}));
    }

    #[test]
    fn builders_are_deterministic() {
        let query = sample_query();
        assert_eq!(Payload::upsert_query(&query), Payload::upsert_query(&query));
    }
}
