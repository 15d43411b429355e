//! Route templates.
//!
//! A [`RoutePattern`] is parsed once from a template such as
//! `/api/orders/{Id}`, `/files/{Path*}` or `/export/{Name}.{Format}` and is
//! immutable afterwards. It answers three questions for an incoming path:
//! does it match, how well does it match, and which request fields do its
//! variables capture.

use crate::dto::{Dto, RequestType};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

const WILDCARD: char = '*';
const PATH_SEPARATOR: char = '/';
const COMPONENT_SEPARATOR: char = '.';
const VARIABLE_PREFIX: char = '{';
const VARIABLE_SUFFIX: char = '}';

/// Variable name that captures a path segment without binding it to a field.
pub const IGNORE_VARIABLE: &str = "ignore";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable {
        name: String,
        // resolved request field, None for the ignore token
        field: Option<String>,
        wildcard: bool,
    },
}

/// One parsed route template bound to a request type.
#[derive(Clone)]
pub struct RoutePattern {
    path: String,
    request_type: Arc<RequestType>,
    verbs: Vec<String>,
    segments: Vec<Segment>,
    // number of exploded segments per top-level component
    widths: Vec<usize>,
    variable_args_count: usize,
    is_wildcard: bool,
    first_match_hash_key: String,
    unique_match_hash_key: String,
    summary: Option<String>,
    notes: Option<String>,
    priority: i32,
}

impl RoutePattern {
    /// Parse `template` for `request_type`.
    ///
    /// `verbs` is a comma or space separated list; `None`, empty, `*` or
    /// `ANY` allow every verb.
    pub fn parse(
        request_type: Arc<RequestType>,
        template: &str,
        verbs: Option<&str>,
    ) -> Result<Self> {
        let verbs = parse_verbs(verbs);

        let mut segments = Vec::new();
        let mut widths = Vec::new();
        for component in template.split(PATH_SEPARATOR).filter(|c| !c.is_empty()) {
            if component.contains(VARIABLE_PREFIX) && component.contains(COMPONENT_SEPARATOR) {
                let parts: Vec<&str> = component.split(COMPONENT_SEPARATOR).collect();
                if parts.iter().any(|p| p.is_empty()) {
                    return Err(Error::InvalidRoute(format!(
                        "empty sub-component in '{}' of route {}",
                        component, template
                    )));
                }
                widths.push(parts.len());
                for part in parts {
                    segments.push(parse_segment(&request_type, template, part)?);
                }
            } else {
                widths.push(1);
                segments.push(parse_segment(&request_type, template, component)?);
            }
        }

        let mut seen = Vec::new();
        let mut is_wildcard = false;
        let mut variable_args_count = 0;
        for (i, segment) in segments.iter().enumerate() {
            if let Segment::Variable { name, wildcard, .. } = segment {
                variable_args_count += 1;
                let lower = name.to_lowercase();
                if seen.contains(&lower) {
                    return Err(Error::InvalidRoute(format!(
                        "variable '{}' appears twice in route {}",
                        name, template
                    )));
                }
                seen.push(lower);

                if *wildcard {
                    if i + 1 != segments.len() {
                        return Err(Error::InvalidRoute(format!(
                            "wildcard '{{{}*}}' must be the last component of route {}",
                            name, template
                        )));
                    }
                    is_wildcard = true;
                }
            }
        }

        let first_literal = segments.iter().find_map(|s| match s {
            Segment::Literal(literal) => Some(literal.as_str()),
            Segment::Variable { .. } => None,
        });
        let first_match_hash_key = if is_wildcard {
            format!("{}{}{}", WILDCARD, PATH_SEPARATOR, first_literal.unwrap_or_default())
        } else {
            format!("{}{}{}", widths.len(), PATH_SEPARATOR, first_literal.unwrap_or_default())
        };

        let unique_match_hash_key = segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Segment::Literal(literal) => Some(format!("{}{}{}", i, PATH_SEPARATOR, literal)),
                Segment::Variable { .. } => None,
            })
            .collect::<String>();

        Ok(Self {
            path: template.to_string(),
            request_type,
            verbs,
            segments,
            widths,
            variable_args_count,
            is_wildcard,
            first_match_hash_key,
            unique_match_hash_key,
            summary: None,
            notes: None,
            priority: 0,
        })
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn request_type(&self) -> &Arc<RequestType> {
        &self.request_type
    }

    /// Upper-cased verbs, or `["ANY"]` when every verb is allowed.
    pub fn verbs(&self) -> Vec<String> {
        if self.allows_all_verbs() {
            vec![crate::verb::ANY_VERB.to_string()]
        } else {
            self.verbs.clone()
        }
    }

    pub fn allows_all_verbs(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn allows_verb(&self, verb: &str) -> bool {
        self.allows_all_verbs() || self.verbs.iter().any(|v| v.eq_ignore_ascii_case(verb))
    }

    /// Whether this and `other` accept at least one verb in common.
    pub fn verbs_overlap(&self, other: &RoutePattern) -> bool {
        self.allows_all_verbs()
            || other.allows_all_verbs()
            || self.verbs.iter().any(|v| other.verbs.contains(v))
    }

    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }

    /// A pattern needs at least one literal to be reachable through the
    /// route table; literal-free patterns can only be fallbacks.
    pub fn is_valid(&self) -> bool {
        !self.unique_match_hash_key.is_empty()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Variable { name, .. } => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn is_variable(&self, name: &str) -> bool {
        self.variable_names()
            .iter()
            .any(|v| v.eq_ignore_ascii_case(name))
    }

    /// Number of `/` separated components.
    pub fn path_components_count(&self) -> usize {
        self.widths.len()
    }

    /// Number of components after dotted components are exploded.
    pub fn total_components_count(&self) -> usize {
        self.segments.len()
    }

    pub fn variable_args_count(&self) -> usize {
        self.variable_args_count
    }

    pub fn first_match_hash_key(&self) -> &str {
        &self.first_match_hash_key
    }

    pub fn unique_match_hash_key(&self) -> &str {
        &self.unique_match_hash_key
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Lower-cased, non-empty path components.
    pub fn parts_for_matching(path_info: &str) -> Vec<String> {
        path_info
            .to_lowercase()
            .split(PATH_SEPARATOR)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Route-table keys a path could be filed under: the component count
    /// followed by every component and dotted sub-component.
    pub fn first_match_hash_keys(parts: &[String]) -> Vec<String> {
        hash_keys_with_prefix(&format!("{}{}", parts.len(), PATH_SEPARATOR), parts)
    }

    /// Keys for wildcard routes the path could be filed under.
    pub fn first_match_wildcard_hash_keys(parts: &[String]) -> Vec<String> {
        hash_keys_with_prefix(&format!("{}{}", WILDCARD, PATH_SEPARATOR), parts)
    }

    /// `parts` must come from [`RoutePattern::parts_for_matching`].
    pub fn is_match(&self, verb: &str, parts: &[String]) -> bool {
        self.allows_verb(verb) && self.wildcard_match_count(parts).is_some()
    }

    /// Structural match that ignores the verb.
    pub fn matches_path(&self, parts: &[String]) -> bool {
        self.wildcard_match_count(parts).is_some()
    }

    /// Rank of this pattern for `verb` and `parts`, or -1 when it does not
    /// match. Fewer wildcard captures beat more, fewer variables beat more,
    /// and an exact single-verb route beats one that allows the verb among
    /// others.
    pub fn match_score(&self, verb: &str, parts: &[String]) -> i32 {
        if !self.allows_verb(verb) {
            return -1;
        }
        let Some(wildcard_matches) = self.wildcard_match_count(parts) else {
            return -1;
        };

        let mut score = 0;
        score += (100 - wildcard_matches as i32).max(1) * 1000;
        score += (10 - self.variable_args_count as i32).max(1) * 100;

        let exact_verb = self.verbs.len() == 1 && self.verbs[0].eq_ignore_ascii_case(verb);
        score += if exact_verb { 10 } else { 1 };
        score
    }

    /// Returns the number of parts consumed by the tail wildcard.
    fn wildcard_match_count(&self, parts: &[String]) -> Option<usize> {
        if parts.len() != self.path_components_count() && !self.is_wildcard {
            return None;
        }

        let exploded = self.explode(parts)?;
        let total = self.total_components_count();
        let fixed = if self.is_wildcard { total - 1 } else { total };
        if self.is_wildcard {
            if exploded.len() < fixed {
                return None;
            }
        } else if exploded.len() != total {
            return None;
        }

        for (segment, part) in self.segments.iter().zip(exploded.iter()).take(fixed) {
            if let Segment::Literal(literal) = segment
                && literal.as_str() != *part
            {
                return None;
            }
        }

        Some(exploded.len() - fixed)
    }

    /// Split the components this pattern exploded on `.`; `None` when one
    /// of them has no dot.
    fn explode<'a>(&self, parts: &'a [String]) -> Option<Vec<&'a str>> {
        let mut exploded = Vec::with_capacity(self.total_components_count());
        for (i, part) in parts.iter().enumerate() {
            if self.widths.get(i).is_some_and(|w| *w > 1) {
                let subs: Vec<&str> = part.split(COMPONENT_SEPARATOR).collect();
                if subs.len() < 2 {
                    return None;
                }
                exploded.extend(subs);
            } else {
                exploded.push(part.as_str());
            }
        }
        Some(exploded)
    }

    /// Field/value pairs captured from `path_info`, with the original case of
    /// the path preserved. A tail wildcard captures the remaining components
    /// joined with `/`.
    pub fn capture(&self, path_info: &str) -> Result<Vec<(String, String)>> {
        let parts: Vec<String> = path_info
            .split(PATH_SEPARATOR)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        let mismatch = || {
            Error::RouteNotFound(format!(
                "path '{}' has an invalid number of components for route {}",
                path_info, self.path
            ))
        };

        let components = self.explode(&parts).ok_or_else(mismatch)?;
        let total = self.total_components_count();
        let valid_count = components.len() == total
            || (self.is_wildcard && components.len() + 1 >= total);
        if !valid_count {
            return Err(mismatch());
        }

        let mut captured = Vec::with_capacity(self.variable_args_count);
        for (i, segment) in self.segments.iter().enumerate() {
            let Segment::Variable {
                field: Some(field),
                wildcard,
                ..
            } = segment
            else {
                continue;
            };
            if i >= components.len() {
                break;
            }
            let value = if *wildcard {
                components[i..].join("/")
            } else {
                components[i].to_string()
            };
            captured.push((field.clone(), value));
        }
        Ok(captured)
    }

    /// Build the request DTO for `path_info`. `overrides` (query string then
    /// form data) win over captured path variables.
    pub fn create_request(
        &self,
        path_info: &str,
        overrides: &[(String, String)],
    ) -> Result<Box<dyn Dto>> {
        let values = self.capture_with(path_info, overrides)?;
        self.request_type.populate(&values)
    }

    /// Like [`create_request`](Self::create_request) but starting from a
    /// deserialized body.
    pub fn create_request_with_body(
        &self,
        path_info: &str,
        body: Option<serde_json::Value>,
        overrides: &[(String, String)],
    ) -> Result<Box<dyn Dto>> {
        let values = self.capture_with(path_info, overrides)?;
        self.request_type.populate_with_body(body, &values)
    }

    fn capture_with(
        &self,
        path_info: &str,
        overrides: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let mut values = self.capture(path_info)?;
        values.extend(overrides.iter().cloned());
        Ok(values)
    }

    /// Substitute `values` (matched case-insensitively against variable
    /// names and fields) back into the template. Returns `None` when a
    /// non-wildcard variable has no value.
    pub fn render(&self, values: &[(String, String)]) -> Option<String> {
        let lookup = |name: &str, field: Option<&str>| {
            values
                .iter()
                .rev()
                .find(|(k, _)| {
                    k.eq_ignore_ascii_case(name) || field.is_some_and(|f| k.eq_ignore_ascii_case(f))
                })
                .map(|(_, v)| v.as_str())
        };

        let mut rendered = String::new();
        let mut segments = self.segments.iter();
        for width in &self.widths {
            let mut subs = Vec::with_capacity(*width);
            for segment in segments.by_ref().take(*width) {
                match segment {
                    Segment::Literal(literal) => subs.push(literal.clone()),
                    Segment::Variable {
                        name,
                        field,
                        wildcard,
                    } => match lookup(name, field.as_deref()) {
                        Some(value) => subs.push(value.to_string()),
                        None if *wildcard => {}
                        None => return None,
                    },
                }
            }
            if subs.is_empty() {
                continue;
            }
            rendered.push(PATH_SEPARATOR);
            rendered.push_str(&subs.join("."));
        }

        if rendered.is_empty() {
            rendered.push(PATH_SEPARATOR);
        }
        Some(rendered)
    }
}

impl fmt::Debug for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePattern")
            .field("path", &self.path)
            .field("request_type", &self.request_type.name())
            .field("verbs", &self.verbs())
            .field("first_match_hash_key", &self.first_match_hash_key)
            .finish()
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verbs().join(","), self.path)
    }
}

/// Reject templates that do not start with `/` or carry a query string.
pub fn validate_template(template: &str) -> Result<()> {
    if !template.starts_with(PATH_SEPARATOR) {
        return Err(Error::InvalidRoute(format!(
            "route '{}' must start with '/'",
            template
        )));
    }
    if template.contains('?') || template.contains('&') {
        return Err(Error::InvalidRoute(format!(
            "route '{}' must not contain a query string",
            template
        )));
    }
    Ok(())
}

fn parse_verbs(verbs: Option<&str>) -> Vec<String> {
    let Some(verbs) = verbs else {
        return Vec::new();
    };
    let parsed: Vec<String> = verbs
        .split([',', ' '])
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_uppercase)
        .collect();
    if parsed
        .iter()
        .any(|v| v == "*" || v == crate::verb::ANY_VERB)
    {
        return Vec::new();
    }
    parsed
}

fn parse_segment(request_type: &RequestType, template: &str, raw: &str) -> Result<Segment> {
    if !raw.starts_with(VARIABLE_PREFIX) {
        if raw.contains(VARIABLE_PREFIX) || raw.contains(VARIABLE_SUFFIX) {
            return Err(Error::InvalidRoute(format!(
                "malformed component '{}' in route {}",
                raw, template
            )));
        }
        return Ok(Segment::Literal(raw.to_lowercase()));
    }

    let inner = raw
        .strip_prefix(VARIABLE_PREFIX)
        .and_then(|r| r.strip_suffix(VARIABLE_SUFFIX))
        .ok_or_else(|| {
            Error::InvalidRoute(format!("unterminated variable '{}' in route {}", raw, template))
        })?;
    let (name, wildcard) = match inner.strip_suffix(WILDCARD) {
        Some(name) => (name, true),
        None => (inner, false),
    };
    if name.is_empty() {
        return Err(Error::InvalidRoute(format!(
            "empty variable name in route {}",
            template
        )));
    }

    let field = match request_type.field(name) {
        Some(field) => Some(field.to_string()),
        None if name.eq_ignore_ascii_case(IGNORE_VARIABLE) => None,
        None => {
            return Err(Error::UnknownRouteVariable {
                request_type: request_type.name().to_string(),
                variable: name.to_string(),
            });
        }
    };

    Ok(Segment::Variable {
        name: name.to_string(),
        field,
        wildcard,
    })
}

fn hash_keys_with_prefix(prefix: &str, parts: &[String]) -> Vec<String> {
    let mut keys = Vec::with_capacity(parts.len());
    for part in parts {
        keys.push(format!("{}{}", prefix, part));
        if part.contains(COMPONENT_SEPARATOR) {
            for sub in part.split(COMPONENT_SEPARATOR) {
                keys.push(format!("{}{}", prefix, sub));
            }
        }
    }
    keys
}
