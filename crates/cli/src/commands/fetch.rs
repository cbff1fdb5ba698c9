use std::path::Path;

use dune_client::config::query_id_from_lookup;
use dune_interchange::{Network, Query, QueryParameter, Record, Value};

use super::{CmdResult, Context};
use crate::OutputFormat;

pub(crate) fn cmd_fetch(
    ctx: &Context,
    sql_path: &Path,
    query_id: Option<u64>,
    name: Option<String>,
    network: Network,
    params: Vec<QueryParameter>,
) -> CmdResult {
    let raw_sql = std::fs::read_to_string(sql_path)
        .map_err(|e| format!("could not read '{}': {}", sql_path.display(), e))?;

    let query_id = match query_id {
        Some(id) => id,
        None => query_id_from_lookup(|var| std::env::var(var).ok())?
            .ok_or("no query id: pass --query-id or set DUNE_QUERY_ID")?,
    };
    let name = name.unwrap_or_else(|| {
        sql_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "query".to_string())
    });
    let query = Query::new(query_id, name, raw_sql, network).with_parameters(params);

    let mut client = ctx.connect()?;
    let records = client.fetch(&query)?;
    ctx.note(&format!("fetched {} records from query {}", records.len(), query_id));

    let columns = match client.last_metadata() {
        Some(meta) => meta.columns.clone(),
        None => records
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default(),
    };

    match ctx.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => print!("{}", render_table(&columns, &records)),
    }
    Ok(())
}

/// Tab-separated header line followed by one line per record.
fn render_table(columns: &[String], records: &[Record]) -> String {
    let mut out = columns.join("\t");
    out.push('\n');
    for record in records {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match record.get(c) {
                None | Some(Value::Null) => String::new(),
                Some(value) => value.to_string(),
            })
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}
