//! Trace-label path normalization.
//!
//! Concrete paths such as `/users/42` make unbounded label sets. The
//! [`TraceLabeler`] maps them back to the registered pattern
//! (`/users/{id}`) that tracing spans, logs and metrics use instead.
//!
//! Each parameterized pattern is escaped segment by segment, every
//! `{param}` becomes a single-segment wildcard, and all of them are
//! compiled into one [`RegexSet`]. When several patterns match, the label
//! is the one the router dispatches to: a literal segment beats a
//! parameter at the first position where the patterns differ, and patterns
//! bound to the request method beat those that are not. A path equal to a
//! literal pattern keeps its own name. Reserved runtime paths never become
//! candidates. Paths that match nothing are used unchanged.

use std::cmp::Ordering;
use std::collections::HashMap;

use http::Method;
use kairos_core::{BoxFuture, Request, RequestContext, Response};
use regex::RegexSet;

use crate::middleware::{Middleware, Next};
use crate::stages::is_reserved_path;

/// Methods bound to one pattern. `None` means any method.
#[derive(Debug, Clone)]
struct Methods(Option<Vec<Method>>);

impl Methods {
    fn first(method: Option<&Method>) -> Self {
        Self(method.map(|m| vec![m.clone()]))
    }

    fn add(&mut self, method: Option<&Method>) {
        let Some(m) = method else {
            self.0 = None;
            return;
        };
        if let Some(bound) = &mut self.0 {
            if !bound.contains(m) {
                bound.push(m.clone());
            }
        }
    }

    fn allows(&self, method: &Method) -> bool {
        self.0.as_ref().map_or(true, |bound| bound.contains(method))
    }
}

/// Maps concrete paths to registered route patterns.
#[derive(Debug, Clone)]
pub struct TraceLabeler {
    literals: HashMap<String, Methods>,
    patterns: Vec<(String, Methods)>,
    matcher: Option<RegexSet>,
}

impl Default for TraceLabeler {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl TraceLabeler {
    /// Builds a labeler from patterns bound under any method.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(patterns.into_iter().map(|p| (None, p)))
    }

    /// Builds a labeler from `(method, pattern)` bindings, as a router
    /// lists them.
    pub fn from_routes<'m, I, S>(routes: I) -> Self
    where
        I: IntoIterator<Item = (&'m Method, S)>,
        S: AsRef<str>,
    {
        Self::build(routes.into_iter().map(|(m, p)| (Some(m), p)))
    }

    fn build<'m, I, S>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (Option<&'m Method>, S)>,
        S: AsRef<str>,
    {
        let mut literals: HashMap<String, Methods> = HashMap::new();
        let mut parameterized: Vec<(String, Methods)> = Vec::new();

        for (method, pattern) in bindings {
            let pattern = pattern.as_ref();
            if is_reserved_path(pattern) {
                continue;
            }
            let normalized = normalize(pattern);
            if pattern.contains('{') {
                match parameterized.iter_mut().find(|(p, _)| *p == normalized) {
                    Some((_, bound)) => bound.add(method),
                    None => parameterized.push((normalized, Methods::first(method))),
                }
            } else {
                literals
                    .entry(normalized)
                    .and_modify(|bound| bound.add(method))
                    .or_insert_with(|| Methods::first(method));
            }
        }

        // Stable: equally specific patterns keep registration order.
        parameterized.sort_by(|(a, _), (b, _)| specificity(a, b));

        let matcher = if parameterized.is_empty() {
            None
        } else {
            match RegexSet::new(parameterized.iter().map(|(p, _)| to_regex(p))) {
                Ok(set) => Some(set),
                Err(e) => {
                    tracing::warn!(error = %e, "trace label patterns failed to compile");
                    None
                }
            }
        };

        Self {
            literals,
            patterns: parameterized,
            matcher,
        }
    }

    /// Label for `path` under any method.
    #[must_use]
    pub fn label<'a>(&'a self, path: &'a str) -> &'a str {
        self.resolve(None, path)
    }

    /// Label for `path` as the router would dispatch `method` to it.
    ///
    /// When no pattern is bound to `method` the most specific pattern
    /// under any method is used, so 405 responses still get a bounded
    /// label.
    #[must_use]
    pub fn label_for<'a>(&'a self, method: &Method, path: &'a str) -> &'a str {
        self.resolve(Some(method), path)
    }

    fn resolve<'a>(&'a self, method: Option<&Method>, path: &'a str) -> &'a str {
        if is_reserved_path(path) {
            return path;
        }
        let allowed = |methods: &Methods| method.map_or(true, |m| methods.allows(m));

        let literal = self.literals.get(normalize(path).as_str());
        if literal.is_some_and(allowed) {
            return path;
        }

        let matches: Vec<usize> = self
            .matcher
            .as_ref()
            .map(|set| set.matches(path).into_iter().collect())
            .unwrap_or_default();
        if let Some(&index) = matches.iter().find(|&&i| allowed(&self.patterns[i].1)) {
            return self.patterns[index].0.as_str();
        }
        if literal.is_some() {
            return path;
        }
        matches
            .first()
            .map_or(path, |&index| self.patterns[index].0.as_str())
    }

    /// Parameterized candidate patterns, most specific first.
    #[must_use]
    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|(p, _)| p.as_str()).collect()
    }
}

/// Router preference between two patterns: at the first position where
/// one has a literal segment and the other a parameter, the literal wins.
fn specificity(a: &str, b: &str) -> Ordering {
    let kinds = |pattern: &str| -> Vec<bool> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.starts_with('{'))
            .collect()
    };
    kinds(a).cmp(&kinds(b))
}

fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn to_regex(pattern: &str) -> String {
    let segments: Vec<String> = pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if segment.starts_with('{') && segment.ends_with('}') {
                "[^/]+".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect();
    format!("^/+{}/*$", segments.join("/+"))
}

/// Writes the normalized label onto the context.
#[derive(Debug, Clone, Default)]
pub struct TraceLabelMiddleware {
    labeler: std::sync::Arc<TraceLabeler>,
}

impl TraceLabelMiddleware {
    /// Creates the stage around a shared labeler.
    #[must_use]
    pub const fn new(labeler: std::sync::Arc<TraceLabeler>) -> Self {
        Self { labeler }
    }
}

impl Middleware for TraceLabelMiddleware {
    fn name(&self) -> &'static str {
        "trace_label"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let label = self
            .labeler
            .label_for(request.method(), request.uri().path())
            .to_string();
        ctx.set_trace_label(label);
        next.run(ctx, request)
    }
}
