//! Method + path-pattern routing.
//!
//! Patterns whose path starts with `/_` live in a system mux, all others in
//! an index mux. A request path picks exactly one of the two, so patterns
//! such as `POST /_snapshot/{repository}/_mount` and
//! `POST /{index}/_explain/{id}` never compete for the same request.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use http::Method;

use super::{Policy, PolicyError, SharedPolicy, same_policy};
use crate::{
    core::{
        connection::Connection,
        pool::{PoolFactory, StatusPool},
    },
    ports::{HealthCheck, Request},
};

const SYSTEM_PREFIX: &str = "/_";

type MethodMux = HashMap<Method, matchit::Router<SharedPolicy>>;

/// Routes requests by `METHOD /path` pattern.
pub struct MuxPolicy {
    system: MethodMux,
    index: MethodMux,
    unique: Vec<SharedPolicy>,
    enabled: AtomicBool,
}

impl MuxPolicy {
    /// Build from `(pattern, policy)` pairs, e.g. `("POST /{index}/_bulk", p)`.
    pub fn new<I, S>(routes: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = (S, SharedPolicy)>,
        S: AsRef<str>,
    {
        let mut system = MethodMux::new();
        let mut index = MethodMux::new();
        let mut unique: Vec<SharedPolicy> = Vec::new();

        for (pattern, policy) in routes {
            let pattern = pattern.as_ref();
            let (method, path) = parse_pattern(pattern)?;
            let mux = if path.starts_with(SYSTEM_PREFIX) {
                &mut system
            } else {
                &mut index
            };

            mux.entry(method)
                .or_default()
                .insert(normalize_params(path), policy.clone())
                .map_err(|e| PolicyError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;

            if !unique.iter().any(|p| same_policy(p, &policy)) {
                unique.push(policy);
            }
        }

        let enabled = unique.iter().any(|p| p.is_enabled());
        Ok(Self {
            system,
            index,
            unique,
            enabled: AtomicBool::new(enabled),
        })
    }

    /// Distinct sub-policies by identity.
    pub fn policies(&self) -> &[SharedPolicy] {
        &self.unique
    }

    /// The policy registered for `method` and `path`, if any.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&SharedPolicy> {
        let mux = if path.starts_with(SYSTEM_PREFIX) {
            &self.system
        } else {
            &self.index
        };
        let path = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => path,
        };
        mux.get(method)?.at(path).ok().map(|matched| matched.value)
    }
}

/// Split and validate `METHOD SP PATH`.
fn parse_pattern(pattern: &str) -> Result<(Method, &str), PolicyError> {
    let invalid = |reason: &str| PolicyError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let (method, path) = pattern
        .split_once(' ')
        .ok_or_else(|| invalid("expected \"METHOD /path\""))?;

    let method = match method {
        "GET" => Method::GET,
        "HEAD" => Method::HEAD,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        "CONNECT" => Method::CONNECT,
        "OPTIONS" => Method::OPTIONS,
        "TRACE" => Method::TRACE,
        _ => return Err(invalid("unknown HTTP method")),
    };

    if !path.starts_with('/') || path.contains(' ') {
        return Err(invalid("path must start with '/' and contain no spaces"));
    }

    Ok((method, path))
}

/// Rename `{name}` segments after their position so that patterns sharing a
/// prefix agree on parameter names.
fn normalize_params(path: &str) -> String {
    path.split('/')
        .enumerate()
        .map(|(i, segment)| {
            if segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}') {
                format!("{{p{i}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl Policy for MuxPolicy {
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        for policy in &self.unique {
            policy.discovery_update(added, removed, unchanged);
        }
        let enabled = self.unique.iter().any(|p| p.is_enabled());
        self.enabled.store(enabled, Ordering::Release);
    }

    async fn check_dead(&self, health_check: &dyn HealthCheck) {
        for policy in &self.unique {
            policy.check_dead(health_check).await;
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn eval(&self, req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError> {
        match self.lookup(req.method(), req.uri().path()) {
            Some(policy) => policy.eval(req),
            None => Ok(None),
        }
    }

    fn configure_pool_factory(&self, factory: &PoolFactory) {
        for policy in &self.unique {
            policy.configure_pool_factory(factory);
        }
    }
}
