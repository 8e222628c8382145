//! Radix tree node.
//!
//! Each node owns one path segment. Static children are kept sorted for
//! binary search; a node has at most one parameter child. Lookups try the
//! static child before the parameter child and backtrack on failure, which
//! makes the pattern with more literal segments at the point of divergence
//! win.

use smallvec::SmallVec;

use crate::error::RouteError;
use crate::method_router::MethodRouter;

/// Inline capacity for bound parameter values during a lookup.
pub(crate) type Captures<'p> = SmallVec<[&'p str; 4]>;

/// One parsed segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Static(String),
    Param(String),
}

/// Splits a pattern into segments, rejecting malformed placeholders.
pub(crate) fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    if !pattern.starts_with('/') {
        return Err(RouteError::invalid(pattern, "pattern must start with '/'"));
    }

    let mut segments = Vec::new();
    for raw in pattern.split('/').filter(|s| !s.is_empty()) {
        if let Some(name) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(RouteError::invalid(pattern, "empty or nested parameter name"));
            }
            if segments
                .iter()
                .any(|s| matches!(s, Segment::Param(existing) if existing == name))
            {
                return Err(RouteError::DuplicateParam {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
            segments.push(Segment::Param(name.to_string()));
        } else if raw.contains(['{', '}']) {
            return Err(RouteError::invalid(
                pattern,
                "parameters must span a whole segment",
            ));
        } else {
            segments.push(Segment::Static(raw.to_string()));
        }
    }
    Ok(segments)
}

/// Splits a concrete request path into its non-empty segments.
pub(crate) fn split_path(path: &str) -> SmallVec<[&str; 8]> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone)]
pub(crate) struct Node<L> {
    segment: String,
    methods: Option<MethodRouter<L>>,
    static_children: Vec<Node<L>>,
    param_child: Option<Box<Node<L>>>,
}

impl<L> Node<L> {
    pub(crate) fn root() -> Self {
        Self::new(String::new())
    }

    fn new(segment: String) -> Self {
        Self {
            segment,
            methods: None,
            static_children: Vec::new(),
            param_child: None,
        }
    }

    /// Binds `leaf` for `method` at the node addressed by `segments`.
    pub(crate) fn insert(
        &mut self,
        segments: &[Segment],
        method: &http::Method,
        leaf: L,
    ) -> Option<L> {
        let Some((first, rest)) = segments.split_first() else {
            return self
                .methods
                .get_or_insert_with(MethodRouter::new)
                .set(method, leaf);
        };

        match first {
            Segment::Static(literal) => {
                let index = match self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(literal))
                {
                    Ok(index) => index,
                    Err(index) => {
                        self.static_children
                            .insert(index, Node::new(literal.clone()));
                        index
                    }
                };
                self.static_children[index].insert(rest, method, leaf)
            }
            Segment::Param(_) => self
                .param_child
                .get_or_insert_with(|| Box::new(Node::new(String::new())))
                .insert(rest, method, leaf),
        }
    }

    /// Finds the most specific node whose method table satisfies `accept`.
    ///
    /// Values bound by parameter segments are appended to `captures` in
    /// pattern order; on failure `captures` is left as it was.
    pub(crate) fn find<'n, 'p, F>(
        &'n self,
        segments: &[&'p str],
        captures: &mut Captures<'p>,
        accept: &F,
    ) -> Option<&'n MethodRouter<L>>
    where
        F: Fn(&MethodRouter<L>) -> bool,
    {
        let Some((first, rest)) = segments.split_first() else {
            return self.methods.as_ref().filter(|m| accept(m));
        };

        if let Some(child) = self.find_static_child(first) {
            if let Some(found) = child.find(rest, captures, accept) {
                return Some(found);
            }
        }

        if let Some(child) = &self.param_child {
            captures.push(*first);
            if let Some(found) = child.find(rest, captures, accept) {
                return Some(found);
            }
            captures.pop();
        }

        None
    }

    /// Calls `visit` for every node whose pattern matches `segments`,
    /// regardless of method.
    pub(crate) fn visit_matches<F>(&self, segments: &[&str], visit: &mut F)
    where
        F: FnMut(&MethodRouter<L>),
    {
        let Some((first, rest)) = segments.split_first() else {
            if let Some(methods) = &self.methods {
                visit(methods);
            }
            return;
        };

        if let Some(child) = self.find_static_child(first) {
            child.visit_matches(rest, visit);
        }
        if let Some(child) = &self.param_child {
            child.visit_matches(rest, visit);
        }
    }

    fn find_static_child(&self, segment: &str) -> Option<&Node<L>> {
        self.static_children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i])
    }
}
