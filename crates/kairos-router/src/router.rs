//! High-level router API.

use std::fmt;

use http::Method;

use crate::error::RouteError;
use crate::method_router::MethodRouter;
use crate::node::{parse_pattern, split_path, Captures, Node, Segment};
use crate::params::Params;

/// A registered `(method, pattern)` pair, as exposed by [`Router::routes`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteInfo {
    /// HTTP method of the binding.
    pub method: Method,
    /// Normalized pattern, e.g. `/users/{id}`.
    pub pattern: String,
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

/// Outcome category of [`Router::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// A binding exists for the method and path.
    Matched,
    /// The path is known, but not under the requested method.
    WrongMethod,
    /// No registered pattern matches the path.
    NotFound,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, T> {
    /// The bound value (usually a handler).
    pub value: &'a T,
    /// The pattern that matched.
    pub pattern: &'a str,
    /// Parameter bindings extracted from the concrete path.
    pub params: Params,
}

/// Result of resolving a `(method, path)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a, T> {
    /// The request resolves to a binding.
    Matched(RouteMatch<'a, T>),
    /// Some other method is registered for this path.
    WrongMethod {
        /// Methods that would have matched, deduplicated.
        allowed: Vec<Method>,
    },
    /// Nothing is registered for this path.
    NotFound,
}

impl<T> Resolution<'_, T> {
    /// Returns the outcome category.
    #[must_use]
    pub const fn kind(&self) -> MatchKind {
        match self {
            Self::Matched(_) => MatchKind::Matched,
            Self::WrongMethod { .. } => MatchKind::WrongMethod,
            Self::NotFound => MatchKind::NotFound,
        }
    }
}

#[derive(Debug, Clone)]
struct Endpoint<T> {
    pattern: String,
    names: Vec<String>,
    value: T,
}

/// Method-aware radix tree router.
///
/// Registration is expected to finish before the router is shared; the
/// table is then read-only and needs no synchronization.
///
/// # Example
///
/// ```rust
/// use http::Method;
/// use kairos_router::{Resolution, Router};
///
/// let mut router = Router::new();
/// router.route(Method::GET, "/users/{id}", "get_user").unwrap();
///
/// match router.resolve(&Method::GET, "/users/42") {
///     Resolution::Matched(m) => {
///         assert_eq!(*m.value, "get_user");
///         assert_eq!(m.params.get("id"), Some("42"));
///     }
///     other => panic!("unexpected {other:?}"),
/// }
///
/// assert!(matches!(
///     router.resolve(&Method::POST, "/users/42"),
///     Resolution::WrongMethod { .. }
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct Router<T> {
    root: Node<Endpoint<T>>,
    routes: Vec<RouteInfo>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            routes: Vec::new(),
        }
    }

    /// Binds `value` to `(method, pattern)`.
    ///
    /// Registering the same pair again overwrites the previous binding and
    /// returns it. Two patterns that differ only in parameter names address
    /// the same binding.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        value: T,
    ) -> Result<Option<T>, RouteError> {
        let segments = parse_pattern(pattern)?;
        let normalized = normalize(&segments);
        let names = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.clone()),
                Segment::Static(_) => None,
            })
            .collect();

        let endpoint = Endpoint {
            pattern: normalized.clone(),
            names,
            value,
        };

        match self.root.insert(&segments, &method, endpoint) {
            Some(previous) => {
                if let Some(info) = self
                    .routes
                    .iter_mut()
                    .find(|r| r.method == method && r.pattern == previous.pattern)
                {
                    info.pattern = normalized;
                }
                Ok(Some(previous.value))
            }
            None => {
                self.routes.push(RouteInfo {
                    method,
                    pattern: normalized,
                });
                Ok(None)
            }
        }
    }

    /// Resolves a request to a binding, or explains why it cannot.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_, T> {
        let segments = split_path(path);
        let mut captures = Captures::new();

        let found = self
            .root
            .find(&segments, &mut captures, &|m: &MethodRouter<Endpoint<T>>| {
                m.get(method).is_some()
            })
            .and_then(|methods| methods.get(method));

        if let Some(endpoint) = found {
            let params = endpoint
                .names
                .iter()
                .cloned()
                .zip(captures.iter().map(|v| (*v).to_string()))
                .collect();
            return Resolution::Matched(RouteMatch {
                value: &endpoint.value,
                pattern: &endpoint.pattern,
                params,
            });
        }

        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::WrongMethod { allowed }
        }
    }

    /// Every method registered under any pattern matching `path`.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let segments = split_path(path);
        let mut allowed: Vec<Method> = Vec::new();
        self.root.visit_matches(&segments, &mut |methods: &MethodRouter<Endpoint<T>>| {
            for method in methods.allowed() {
                if !allowed.contains(&method) {
                    allowed.push(method);
                }
            }
        });
        allowed
    }

    /// All registered bindings in registration order.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Number of registered `(method, pattern)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn normalize(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }

    let mut pattern = String::new();
    for segment in segments {
        pattern.push('/');
        match segment {
            Segment::Static(literal) => pattern.push_str(literal),
            Segment::Param(name) => {
                pattern.push('{');
                pattern.push_str(name);
                pattern.push('}');
            }
        }
    }
    pattern
}
