//! Property tests for route resolution.

use http::Method;
use kairos_router::{MatchKind, Resolution, Router};
use proptest::prelude::*;

/// A literal segment that can never be mistaken for a placeholder.
fn literal() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

/// A concrete value for a parameter segment.
fn value() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,12}"
}

/// Pattern shape: `Some(literal)` or `None` for a parameter.
fn shape() -> impl Strategy<Value = Vec<Option<String>>> {
    prop::collection::vec(prop::option::of(literal()), 1..6)
}

fn build(shape: &[Option<String>], values: &[String]) -> (String, String) {
    let mut pattern = String::new();
    let mut path = String::new();
    for (i, segment) in shape.iter().enumerate() {
        pattern.push('/');
        path.push('/');
        match segment {
            Some(lit) => {
                pattern.push_str(lit);
                path.push_str(lit);
            }
            None => {
                pattern.push_str(&format!("{{p{i}}}"));
                path.push_str(&values[i % values.len()]);
            }
        }
    }
    (pattern, path)
}

proptest! {
    #[test]
    fn registered_route_resolves_with_bindings(
        shape in shape(),
        values in prop::collection::vec(value(), 1..6),
    ) {
        let (pattern, path) = build(&shape, &values);
        let mut router = Router::new();
        router.route(Method::GET, &pattern, pattern.clone()).unwrap();

        match router.resolve(&Method::GET, &path) {
            Resolution::Matched(m) => {
                prop_assert_eq!(m.value, &pattern);
                for (i, segment) in shape.iter().enumerate() {
                    if segment.is_none() {
                        let name = format!("p{i}");
                        prop_assert_eq!(m.params.get(&name), Some(values[i % values.len()].as_str()));
                    }
                }
            }
            other => prop_assert!(false, "expected match, got {:?}", other.kind()),
        }
    }

    #[test]
    fn other_method_yields_wrong_method(
        shape in shape(),
        values in prop::collection::vec(value(), 1..6),
    ) {
        let (pattern, path) = build(&shape, &values);
        let mut router = Router::new();
        router.route(Method::PUT, &pattern, ()).unwrap();

        prop_assert_eq!(router.resolve(&Method::GET, &path).kind(), MatchKind::WrongMethod);
        prop_assert_eq!(router.resolve(&Method::PUT, &path).kind(), MatchKind::Matched);
    }

    #[test]
    fn unmatched_path_is_not_found(
        shape in shape(),
        values in prop::collection::vec(value(), 1..6),
        extra in literal(),
    ) {
        let (pattern, path) = build(&shape, &values);
        let mut router = Router::new();
        router.route(Method::GET, &pattern, ()).unwrap();

        let longer = format!("{path}/{extra}");
        prop_assert_eq!(router.resolve(&Method::GET, &longer).kind(), MatchKind::NotFound);
        prop_assert_eq!(router.resolve(&Method::POST, &longer).kind(), MatchKind::NotFound);
    }
}
