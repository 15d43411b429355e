// Route table: hash-bucketed index of route patterns

use crate::logging::{debug, trace, warn};
use crate::route_pattern::{RoutePattern, validate_template};
use crate::{Error, Result};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of looking a request up in the [`RouteTable`].
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found(Arc<RoutePattern>),
    /// Some route matches the path, none of them accepts the verb.
    MethodNotAllowed { allowed: Vec<String> },
    NotFound,
}

impl RouteMatch {
    pub fn is_found(&self) -> bool {
        matches!(self, RouteMatch::Found(_))
    }

    pub fn pattern(&self) -> Option<&Arc<RoutePattern>> {
        match self {
            RouteMatch::Found(pattern) => Some(pattern),
            _ => None,
        }
    }

    /// Convert a miss into the routing fault a transport should report.
    pub fn into_result(self, verb: &str, path_info: &str) -> Result<Arc<RoutePattern>> {
        match self {
            RouteMatch::Found(pattern) => Ok(pattern),
            RouteMatch::MethodNotAllowed { allowed } => Err(Error::MethodNotAllowed(format!(
                "{} {} (allowed: {})",
                verb,
                path_info,
                allowed.join(", ")
            ))),
            RouteMatch::NotFound => Err(Error::RouteNotFound(format!("{} {}", verb, path_info))),
        }
    }
}

/// All registered routes, bucketed by first-match hash key.
///
/// Buckets keep registration order, so when two patterns in a bucket match
/// the same request the one registered first wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    buckets: HashMap<String, Vec<Arc<RoutePattern>>>,
    routes: Vec<Arc<RoutePattern>>,
    fallback: Option<Arc<RoutePattern>>,
    strict: bool,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::with_strict_validation(true)
    }

    /// When `strict` is set, templates must start with `/` and carry no
    /// query string.
    pub fn with_strict_validation(strict: bool) -> Self {
        Self {
            strict,
            ..Default::default()
        }
    }

    pub fn register(&mut self, pattern: RoutePattern) -> Result<Arc<RoutePattern>> {
        if self.strict {
            validate_template(pattern.path())?;
        }
        if !pattern.is_valid() {
            return Err(Error::InvalidRoute(format!(
                "route {} has no literal component; register it as the fallback route instead",
                pattern.path()
            )));
        }

        let bucket = self
            .buckets
            .entry(pattern.first_match_hash_key().to_string())
            .or_default();

        for existing in bucket.iter() {
            let same_shape = existing.unique_match_hash_key() == pattern.unique_match_hash_key()
                && existing.total_components_count() == pattern.total_components_count()
                && existing.is_wildcard() == pattern.is_wildcard()
                && existing.verbs_overlap(&pattern);
            if !same_shape {
                continue;
            }
            if existing.request_type().id() == pattern.request_type().id() {
                return Err(Error::AmbiguousRegistration(format!(
                    "route {} is registered twice for {}",
                    pattern,
                    pattern.request_type().name()
                )));
            }
            warn!(
                route = %pattern,
                shadowed_by = existing.request_type().name(),
                request_type = pattern.request_type().name(),
                "route is shadowed by an earlier registration"
            );
        }

        let pattern = Arc::new(pattern);
        bucket.push(Arc::clone(&pattern));
        self.routes.push(Arc::clone(&pattern));
        debug!(
            route = %pattern,
            request_type = pattern.request_type().name(),
            key = pattern.first_match_hash_key(),
            "registered route"
        );
        Ok(pattern)
    }

    /// Install the route tried after every bucket has missed. Literal-free
    /// patterns are allowed here; only one fallback may exist.
    pub fn set_fallback(&mut self, pattern: RoutePattern) -> Result<Arc<RoutePattern>> {
        if let Some(existing) = &self.fallback {
            return Err(Error::AmbiguousRegistration(format!(
                "fallback route already set to {} for {}",
                existing.path(),
                existing.request_type().name()
            )));
        }
        if self.strict {
            validate_template(pattern.path())?;
        }

        let pattern = Arc::new(pattern);
        self.fallback = Some(Arc::clone(&pattern));
        self.routes.push(Arc::clone(&pattern));
        debug!(route = %pattern, "registered fallback route");
        Ok(pattern)
    }

    /// First bucket in precedence order (exact component count, then
    /// wildcard), first pattern in registration order.
    pub fn find_match(&self, verb: &str, path_info: &str) -> RouteMatch {
        let parts = RoutePattern::parts_for_matching(path_info);

        for pattern in self.candidates(&parts) {
            if pattern.is_match(verb, &parts) {
                trace!(verb, path_info, route = pattern.path(), "route matched");
                return RouteMatch::Found(Arc::clone(pattern));
            }
        }
        if let Some(fallback) = &self.fallback
            && fallback.is_match(verb, &parts)
        {
            trace!(verb, path_info, "fallback route matched");
            return RouteMatch::Found(Arc::clone(fallback));
        }

        let mut allowed: Vec<String> = self
            .candidates(&parts)
            .chain(self.fallback.iter())
            .filter(|p| p.matches_path(&parts))
            .flat_map(|p| p.verbs())
            .collect();
        if allowed.is_empty() {
            trace!(verb, path_info, "no route matched");
            return RouteMatch::NotFound;
        }
        allowed.sort();
        allowed.dedup();
        RouteMatch::MethodNotAllowed { allowed }
    }

    /// Like [`find_match`](Self::find_match), but within the first bucket
    /// that has matches the pattern with the highest
    /// [`match_score`](RoutePattern::match_score) wins.
    pub fn find_best_match(&self, verb: &str, path_info: &str) -> Option<Arc<RoutePattern>> {
        let parts = RoutePattern::parts_for_matching(path_info);

        for key in self.candidate_keys(&parts) {
            let Some(bucket) = self.buckets.get(&key) else {
                continue;
            };
            let mut best: Option<(i32, &Arc<RoutePattern>)> = None;
            for pattern in bucket {
                let score = pattern.match_score(verb, &parts);
                if score < 0 {
                    continue;
                }
                if best.is_none_or(|(top, _)| score > top) {
                    best = Some((score, pattern));
                }
            }
            if let Some((_, pattern)) = best {
                return Some(Arc::clone(pattern));
            }
        }

        self.fallback
            .as_ref()
            .filter(|f| f.is_match(verb, &parts))
            .cloned()
    }

    /// Every route, fallback included, in registration order.
    pub fn all_routes(&self) -> &[Arc<RoutePattern>] {
        &self.routes
    }

    pub fn routes_for(&self, request_type: TypeId) -> Vec<Arc<RoutePattern>> {
        self.routes
            .iter()
            .filter(|p| p.request_type().id() == request_type)
            .cloned()
            .collect()
    }

    pub fn fallback(&self) -> Option<&Arc<RoutePattern>> {
        self.fallback.as_ref()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn candidate_keys(&self, parts: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        RoutePattern::first_match_hash_keys(parts)
            .into_iter()
            .chain(RoutePattern::first_match_wildcard_hash_keys(parts))
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }

    fn candidates<'a>(&'a self, parts: &[String]) -> impl Iterator<Item = &'a Arc<RoutePattern>> + 'a {
        self.candidate_keys(parts)
            .into_iter()
            .filter_map(move |key| self.buckets.get(&key))
            .flatten()
    }
}
