//! Dashboards: named sets of queries refreshed as a unit.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use dune_interchange::{
    slugify, DashboardConfig, DashboardMeta, ParameterEntry, ParameterError, Query, QueryEntry,
};

use crate::config::DEFAULT_BASE_URL;
use crate::engine::{DuneClient, QueryExecutor};
use crate::error::DuneError;
use crate::poll::Clock;
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("dashboard '{dashboard}' contains query id {query_id} more than once")]
    DuplicateQueryId { dashboard: String, query_id: u64 },

    #[error("dashboard '{dashboard}': queries '{first}' and '{second}' have identical SQL")]
    DuplicateQuery {
        dashboard: String,
        first: String,
        second: String,
    },

    #[error("no dashboard '{slug}' owned by '{owner}'")]
    NotFound { owner: String, slug: String },

    #[error("could not access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse dashboard '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("queries '{first}' and '{second}' would both be exported as '{file}'")]
    FileNameClash {
        file: String,
        first: String,
        second: String,
    },

    #[error("query '{name}' has neither a query_file nor an inline query")]
    MissingSql { name: String },

    #[error("query '{name}': {source}")]
    Parameter {
        name: String,
        #[source]
        source: ParameterError,
    },
}

/// Where a dashboard definition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardSource {
    /// A local JSON document.
    File(PathBuf),
    /// A dashboard published on the service.
    Remote { owner: String, slug: String },
}

/// A named, duplicate-free collection of queries.
///
/// No two queries share a `query_id`, and no two queries share an
/// identical SQL body.
#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    name: String,
    slug: String,
    base_url: String,
    queries: Vec<Query>,
}

impl Dashboard {
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        queries: Vec<Query>,
    ) -> Result<Self, DashboardError> {
        let name = name.into();
        check_unique_ids(&name, queries.iter().map(|q| q.query_id()))?;
        check_unique_sql(&name, &queries)?;

        Ok(Dashboard {
            name,
            slug: slug.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            queries,
        })
    }

    /// Build from a parsed document. Relative `query_file` and `requires`
    /// paths resolve against `base_dir`.
    pub fn from_config(config: &DashboardConfig, base_dir: &Path) -> Result<Self, DashboardError> {
        check_unique_ids(&config.meta.name, config.queries.iter().map(|q| q.id))?;
        let queries = config
            .queries
            .iter()
            .map(|entry| load_entry(entry, base_dir))
            .collect::<Result<Vec<_>, _>>()?;
        Dashboard::new(config.meta.name.clone(), config.meta.slug(), queries)
    }

    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self, DashboardError> {
        let config: DashboardConfig =
            serde_json::from_str(text).map_err(|e| DashboardError::Parse {
                path: base_dir.to_path_buf(),
                message: e.to_string(),
            })?;
        Dashboard::from_config(&config, base_dir)
    }

    /// Read a JSON document from disk.
    pub fn from_file(path: &Path) -> Result<Self, DashboardError> {
        let text = read_file(path)?;
        let config: DashboardConfig =
            serde_json::from_str(&text).map_err(|e| DashboardError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Dashboard::from_config(&config, base_dir)
    }

    /// Use `base_url` instead of the public service address for links.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn link(&self) -> String {
        format!("{}/{}", self.base_url, self.slug)
    }

    pub fn query_link(&self, query: &Query) -> String {
        format!("{}/queries/{}", self.base_url, query.query_id())
    }

    /// The configuration document describing this dashboard, with each
    /// query's SQL referenced as `./<file_stem>.sql`.
    pub fn to_config(&self) -> DashboardConfig {
        DashboardConfig {
            meta: DashboardMeta {
                name: self.name.clone(),
                url: Some(self.slug.clone()),
                owner: None,
            },
            queries: self
                .queries
                .iter()
                .map(|q| QueryEntry {
                    id: q.query_id(),
                    name: q.name().to_string(),
                    network: q.network(),
                    query_file: Some(format!("./{}.sql", q.file_stem())),
                    query: None,
                    requires: None,
                    parameters: q.parameters().iter().map(ParameterEntry::from).collect(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dashboard \"{}\": {}", self.name, self.link())?;
        write!(f, "Queries:")?;
        for query in &self.queries {
            write!(f, "\n  {}: {}", query.name(), self.query_link(query))?;
        }
        Ok(())
    }
}

fn check_unique_ids(
    dashboard: &str,
    ids: impl Iterator<Item = u64>,
) -> Result<(), DashboardError> {
    let mut seen = Vec::new();
    for id in ids {
        if seen.contains(&id) {
            return Err(DashboardError::DuplicateQueryId {
                dashboard: dashboard.to_string(),
                query_id: id,
            });
        }
        seen.push(id);
    }
    Ok(())
}

fn check_unique_sql(dashboard: &str, queries: &[Query]) -> Result<(), DashboardError> {
    let mut bodies: HashMap<&str, &str> = HashMap::new();
    for query in queries {
        if let Some(first) = bodies.insert(query.raw_sql(), query.name()) {
            return Err(DashboardError::DuplicateQuery {
                dashboard: dashboard.to_string(),
                first: first.to_string(),
                second: query.name().to_string(),
            });
        }
    }
    Ok(())
}

fn load_entry(entry: &QueryEntry, base_dir: &Path) -> Result<Query, DashboardError> {
    let body = match (&entry.query, &entry.query_file) {
        (Some(sql), _) => sql.clone(),
        (None, Some(file)) => read_file(&base_dir.join(file))?,
        (None, None) => {
            return Err(DashboardError::MissingSql {
                name: entry.name.clone(),
            })
        }
    };
    let raw_sql = match &entry.requires {
        Some(base) => format!("{}\n{}", read_file(&base_dir.join(base))?, body),
        None => body,
    };

    let parameters = entry
        .parameters
        .iter()
        .map(ParameterEntry::to_parameter)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| DashboardError::Parameter {
            name: entry.name.clone(),
            source,
        })?;

    Ok(Query::new(entry.id, entry.name.clone(), raw_sql, entry.network).with_parameters(parameters))
}

fn read_file(path: &Path) -> Result<String, DashboardError> {
    std::fs::read_to_string(path).map_err(|source| DashboardError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), DashboardError> {
    std::fs::write(path, contents).map_err(|source| DashboardError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Operations ──────────────────────────────────────────────────────

/// Upsert and execute every query of `dashboard` in order, without waiting
/// for any result.
pub fn refresh_all<E: QueryExecutor + ?Sized>(
    executor: &mut E,
    dashboard: &Dashboard,
) -> Result<(), DuneError> {
    for query in dashboard.queries() {
        tracing::info!(query_id = query.query_id(), name = query.name(), "refreshing");
        executor.initiate(query)?;
        executor.execute(query.query_id())?;
    }
    Ok(())
}

/// Write one `<file_stem>.sql` per query plus a `<dashboard slug>.json`
/// manifest into `target_dir`. Returns the manifest path.
///
/// Loading the manifest with [`Dashboard::from_file`] yields an equal
/// dashboard. If any write fails, the files already written by this call
/// are removed before the error is returned.
pub fn export_config(dashboard: &Dashboard, target_dir: &Path) -> Result<PathBuf, DashboardError> {
    std::fs::create_dir_all(target_dir).map_err(|source| DashboardError::Io {
        path: target_dir.to_path_buf(),
        source,
    })?;

    let mut files: HashMap<String, &str> = HashMap::new();
    for query in dashboard.queries() {
        let file = format!("{}.sql", query.file_stem());
        if let Some(first) = files.insert(file.clone(), query.name()) {
            return Err(DashboardError::FileNameClash {
                file,
                first: first.to_string(),
                second: query.name().to_string(),
            });
        }
    }

    let manifest = serde_json::to_string_pretty(&dashboard.to_config()).map_err(|e| {
        DashboardError::Parse {
            path: target_dir.to_path_buf(),
            message: e.to_string(),
        }
    })?;
    let manifest_path = target_dir.join(format!("{}.json", slugify(dashboard.name())));

    let mut written: Vec<PathBuf> = Vec::new();
    let outcome = dashboard
        .queries()
        .iter()
        .map(|query| {
            (
                target_dir.join(format!("{}.sql", query.file_stem())),
                query.raw_sql(),
            )
        })
        .chain(std::iter::once((manifest_path.clone(), manifest.as_str())))
        .try_for_each(|(path, contents)| {
            write_file(&path, contents).map(|()| written.push(path))
        });
    if let Err(err) = outcome {
        for path in &written {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove partial export");
            }
        }
        return Err(err);
    }
    tracing::info!(path = %manifest_path.display(), queries = dashboard.queries().len(), "exported dashboard");
    Ok(manifest_path)
}

impl<T: Transport, C: Clock> DuneClient<T, C> {
    /// Load a dashboard from a file or from the service.
    pub fn load_dashboard(&mut self, source: &DashboardSource) -> Result<Dashboard, DuneError> {
        let dashboard = match source {
            DashboardSource::File(path) => Dashboard::from_file(path)?,
            DashboardSource::Remote { owner, slug } => {
                let config = self.find_dashboard(owner, slug)?.ok_or_else(|| {
                    DashboardError::NotFound {
                        owner: owner.clone(),
                        slug: slug.clone(),
                    }
                })?;
                Dashboard::from_config(&config, Path::new("."))?
            }
        };
        Ok(dashboard.with_base_url(self.engine().base_url()))
    }

    /// Kick off fresh executions of every query in `dashboard`.
    pub fn refresh_dashboard(&mut self, dashboard: &Dashboard) -> Result<(), DuneError> {
        refresh_all(self, dashboard)
    }
}
