//! Route table of the smart router.
//!
//! Bulk and ingest-pipeline calls prefer ingest nodes, search and document
//! reads prefer search nodes and fall back to data nodes, searchable
//! snapshot calls prefer warm nodes and fall back to data nodes. Anything
//! else is left to the next policy in the chain.
use std::sync::Arc;

use crate::core::{
    connection::{ROLE_DATA, ROLE_INGEST, ROLE_SEARCH, ROLE_WARM},
    policy::{IfEnabledPolicy, MuxPolicy, PolicyError, RolePolicy, SharedPolicy},
};

const BULK: &[&str] = &[
    "POST /_bulk",
    "PUT /_bulk",
    "POST /{index}/_bulk",
    "PUT /{index}/_bulk",
    "POST /_bulk/stream",
    "PUT /_bulk/stream",
    "POST /{index}/_bulk/stream",
    "PUT /{index}/_bulk/stream",
];

const INGEST_PIPELINE_PATHS: &[&str] = &[
    "/_ingest/pipeline",
    "/_ingest/pipeline/{id}",
    "/_ingest/pipeline/_simulate",
    "/_ingest/pipeline/{id}/_simulate",
];

const SEARCH_PATHS: &[&str] = &[
    "/_search",
    "/{index}/_search",
    "/_msearch",
    "/{index}/_msearch",
    "/_count",
    "/{index}/_count",
    "/_mget",
    "/{index}/_mget",
    "/_search/template",
    "/{index}/_search/template",
    "/{index}/_explain/{id}",
    "/{index}/_termvectors",
    "/{index}/_termvectors/{id}",
];

const SEARCH_EXTRA: &[&str] = &[
    "POST /{index}/_delete_by_query",
    "POST /{index}/_update_by_query",
    "GET /{index}/_doc/{id}",
    "HEAD /{index}/_doc/{id}",
    "GET /{index}/_source/{id}",
    "HEAD /{index}/_source/{id}",
];

const WARM: &[&str] = &[
    "POST /_snapshot/{repository}/_mount",
    "POST /_snapshot/{repository}/{snapshot}/_mount",
    "DELETE /_snapshot/{repository}/{snapshot}/_mount/{index}",
    "POST /{index}/_settings",
    "PUT /{index}/_settings",
];

fn with_methods(methods: &[&str], paths: &[&str]) -> Vec<String> {
    methods
        .iter()
        .flat_map(|method| paths.iter().map(move |path| format!("{method} {path}")))
        .collect()
}

/// Build the canonical mux. Role policies are shared across routes so each
/// is updated once per discovery.
pub fn smart_routes() -> Result<MuxPolicy, PolicyError> {
    let ingest: SharedPolicy = Arc::new(RolePolicy::new([ROLE_INGEST])?);
    let data: SharedPolicy = Arc::new(RolePolicy::new([ROLE_DATA])?);
    let search: SharedPolicy = Arc::new(RolePolicy::new([ROLE_SEARCH])?);
    let warm: SharedPolicy = Arc::new(RolePolicy::new([ROLE_WARM])?);

    let search_preferred: SharedPolicy = Arc::new(IfEnabledPolicy::when_enabled(
        search.clone(),
        search,
        data.clone(),
    ));
    let warm_preferred: SharedPolicy =
        Arc::new(IfEnabledPolicy::when_enabled(warm.clone(), warm, data));

    let mut routes: Vec<(String, SharedPolicy)> = Vec::new();

    routes.extend(BULK.iter().map(|p| (p.to_string(), ingest.clone())));
    routes.extend(
        with_methods(&["GET", "POST", "PUT", "DELETE"], INGEST_PIPELINE_PATHS)
            .into_iter()
            .map(|p| (p, ingest.clone())),
    );
    routes.extend(
        with_methods(&["GET", "POST"], SEARCH_PATHS)
            .into_iter()
            .map(|p| (p, search_preferred.clone())),
    );
    routes.extend(SEARCH_EXTRA.iter().map(|p| (p.to_string(), search_preferred.clone())));
    routes.extend(WARM.iter().map(|p| (p.to_string(), warm_preferred.clone())));

    MuxPolicy::new(routes)
}
