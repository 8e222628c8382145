//! Per-path method table.
//!
//! [`MethodRouter`] maps HTTP methods to values for a single path pattern.
//! Standard methods get a dedicated slot; extension methods fall back to a
//! short list.

use http::Method;

/// Method table for one path pattern.
#[derive(Debug, Clone)]
pub struct MethodRouter<T> {
    get: Option<T>,
    post: Option<T>,
    put: Option<T>,
    delete: Option<T>,
    patch: Option<T>,
    head: Option<T>,
    options: Option<T>,
    trace: Option<T>,
    connect: Option<T>,
    extension: Vec<(Method, T)>,
}

impl<T> Default for MethodRouter<T> {
    fn default() -> Self {
        Self {
            get: None,
            post: None,
            put: None,
            delete: None,
            patch: None,
            head: None,
            options: None,
            trace: None,
            connect: None,
            extension: Vec::new(),
        }
    }
}

impl<T> MethodRouter<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, method: &Method) -> Option<&mut Option<T>> {
        match *method {
            Method::GET => Some(&mut self.get),
            Method::POST => Some(&mut self.post),
            Method::PUT => Some(&mut self.put),
            Method::DELETE => Some(&mut self.delete),
            Method::PATCH => Some(&mut self.patch),
            Method::HEAD => Some(&mut self.head),
            Method::OPTIONS => Some(&mut self.options),
            Method::TRACE => Some(&mut self.trace),
            Method::CONNECT => Some(&mut self.connect),
            _ => None,
        }
    }

    /// Binds `value` to `method`, returning the value it replaced.
    pub fn set(&mut self, method: &Method, value: T) -> Option<T> {
        if let Some(slot) = self.slot_mut(method) {
            return slot.replace(value);
        }

        if let Some((_, existing)) = self.extension.iter_mut().find(|(m, _)| m == method) {
            return Some(std::mem::replace(existing, value));
        }
        self.extension.push((method.clone(), value));
        None
    }

    /// Returns the value bound to `method`.
    #[must_use]
    pub fn get(&self, method: &Method) -> Option<&T> {
        match *method {
            Method::GET => self.get.as_ref(),
            Method::POST => self.post.as_ref(),
            Method::PUT => self.put.as_ref(),
            Method::DELETE => self.delete.as_ref(),
            Method::PATCH => self.patch.as_ref(),
            Method::HEAD => self.head.as_ref(),
            Method::OPTIONS => self.options.as_ref(),
            Method::TRACE => self.trace.as_ref(),
            Method::CONNECT => self.connect.as_ref(),
            _ => self
                .extension
                .iter()
                .find(|(m, _)| m == method)
                .map(|(_, v)| v),
        }
    }

    /// Methods with a binding, standard methods first.
    #[must_use]
    pub fn allowed(&self) -> Vec<Method> {
        let standard = [
            (Method::GET, self.get.is_some()),
            (Method::POST, self.post.is_some()),
            (Method::PUT, self.put.is_some()),
            (Method::DELETE, self.delete.is_some()),
            (Method::PATCH, self.patch.is_some()),
            (Method::HEAD, self.head.is_some()),
            (Method::OPTIONS, self.options.is_some()),
            (Method::TRACE, self.trace.is_some()),
            (Method::CONNECT, self.connect.is_some()),
        ];

        standard
            .into_iter()
            .filter_map(|(method, bound)| bound.then_some(method))
            .chain(self.extension.iter().map(|(m, _)| m.clone()))
            .collect()
    }

    /// Returns `true` when no method is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut methods = MethodRouter::new();
        assert!(methods.set(&Method::GET, "list").is_none());
        assert!(methods.set(&Method::POST, "create").is_none());

        assert_eq!(methods.get(&Method::GET), Some(&"list"));
        assert_eq!(methods.get(&Method::POST), Some(&"create"));
        assert_eq!(methods.get(&Method::DELETE), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut methods = MethodRouter::new();
        methods.set(&Method::GET, 1);
        let previous = methods.set(&Method::GET, 2);

        assert_eq!(previous, Some(1));
        assert_eq!(methods.get(&Method::GET), Some(&2));
    }

    #[test]
    fn test_extension_methods() {
        let purge = Method::from_bytes(b"PURGE").unwrap();
        let mut methods = MethodRouter::new();
        methods.set(&purge, "purge");

        assert_eq!(methods.get(&purge), Some(&"purge"));
        assert_eq!(methods.set(&purge, "again"), Some("purge"));
        assert_eq!(methods.allowed(), vec![purge]);
    }

    #[test]
    fn test_allowed_order() {
        let mut methods = MethodRouter::new();
        methods.set(&Method::DELETE, ());
        methods.set(&Method::GET, ());

        assert_eq!(methods.allowed(), vec![Method::GET, Method::DELETE]);
        assert!(!methods.is_empty());
        assert!(MethodRouter::<()>::new().is_empty());
    }
}
