use rivet_core::{Error, RequestType, RouteMatch, RoutePattern, RouteTable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUser {
    id: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserAction {
    id: u32,
    action: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Download {
    action: String,
    r#type: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Files {
    path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Archive {
    year: u32,
    month: u32,
    slug: String,
}

fn request_type<T: rivet_core::RequestDto>() -> Arc<RequestType> {
    Arc::new(RequestType::of::<T>().unwrap())
}

fn pattern<T: rivet_core::RequestDto>(path: &str, verbs: Option<&str>) -> RoutePattern {
    RoutePattern::parse(request_type::<T>(), path, verbs).unwrap()
}

#[test]
fn test_overlapping_patterns_resolve_in_registration_order() {
    let mut table = RouteTable::new();
    let first = table.register(pattern::<GetUser>("/users/{Id}", None)).unwrap();
    table
        .register(pattern::<UserAction>("/users/{Action}", None))
        .unwrap();

    for _ in 0..10 {
        let found = table.find_match("GET", "/users/42");
        assert!(Arc::ptr_eq(found.pattern().unwrap(), &first));
    }
}

#[test]
fn test_round_trip_capture() {
    let route = pattern::<Archive>("/archive/{Year}/{Month}/{Slug}", Some("GET"));
    let path = "/archive/2024/03/Hello-World";

    let captured = route.capture(path).unwrap();
    assert_eq!(route.render(&captured).as_deref(), Some(path));

    let request = route.create_request(path, &[]).unwrap();
    let archive = request.downcast_ref::<Archive>().unwrap();
    assert_eq!(archive.year, 2024);
    assert_eq!(archive.month, 3);
    assert_eq!(archive.slug, "Hello-World");
}

#[test]
fn test_tail_wildcard_captures_remaining_components() {
    let mut table = RouteTable::new();
    table
        .set_fallback(pattern::<Files>("/{Path*}", None))
        .unwrap();

    let route = table.find_match("GET", "/a/b/c").pattern().cloned().unwrap();
    let request = route.create_request("/a/b/c", &[]).unwrap();
    assert_eq!(request.downcast_ref::<Files>().unwrap().path, "a/b/c");
}

#[test]
fn test_exploded_dotted_segments() {
    let route = pattern::<Download>("/{Action}.{Type}", None);
    let parts = RoutePattern::parts_for_matching("/foo.bar");
    assert!(route.is_match("GET", &parts));

    let request = route.create_request("/foo.bar", &[]).unwrap();
    let download = request.downcast_ref::<Download>().unwrap();
    assert_eq!(download.action, "foo");
    assert_eq!(download.r#type, "bar");

    let parts = RoutePattern::parts_for_matching("/foobar");
    assert!(!route.is_match("GET", &parts));
}

#[test]
fn test_verb_restriction() {
    let route = pattern::<GetUser>("/users/{Id}", Some("GET,POST"));
    let parts = RoutePattern::parts_for_matching("/users/1");
    assert!(route.is_match("GET", &parts));
    assert!(route.is_match("post", &parts));
    assert!(!route.is_match("DELETE", &parts));
    assert!(route.matches_path(&parts));

    let mut table = RouteTable::new();
    table.register(route).unwrap();
    match table.find_match("DELETE", "/users/1") {
        RouteMatch::MethodNotAllowed { allowed } => assert_eq!(allowed, vec!["GET", "POST"]),
        other => panic!("expected 405, got {other:?}"),
    }
    assert!(matches!(
        table.find_match("DELETE", "/orders/1"),
        RouteMatch::NotFound
    ));
}

#[test]
fn test_query_and_form_override_path() {
    let route = pattern::<GetUser>("/users/{Id}", None);
    let request = route
        .create_request("/users/5", &[("Id".to_string(), "99".to_string())])
        .unwrap();
    assert_eq!(request.downcast_ref::<GetUser>().unwrap().id, 99);
}

#[test]
fn test_duplicate_route_rejected() {
    let mut table = RouteTable::new();
    table.register(pattern::<GetUser>("/users/{Id}", Some("GET"))).unwrap();
    let result = table.register(pattern::<GetUser>("/users/{Id}", Some("GET")));
    assert!(matches!(result, Err(Error::AmbiguousRegistration(_))));

    // Disjoint verbs are a different route
    table
        .register(pattern::<GetUser>("/users/{Id}", Some("DELETE")))
        .unwrap();
    assert_eq!(table.len(), 2);
}

#[test]
fn test_unknown_route_variable_rejected() {
    let result = RoutePattern::parse(request_type::<GetUser>(), "/users/{Name}", None);
    assert!(matches!(result, Err(Error::UnknownRouteVariable { .. })));
}

#[test]
fn test_best_match_prefers_fewer_variables() {
    let mut table = RouteTable::new();
    table
        .register(pattern::<UserAction>("/users/{Id}/{Action}", None))
        .unwrap();
    let literal = table
        .register(pattern::<GetUser>("/users/{Id}/profile", Some("GET")))
        .unwrap();

    assert_eq!(
        table.find_match("GET", "/users/1/profile").pattern().unwrap().path(),
        "/users/{Id}/{Action}"
    );
    let best = table.find_best_match("GET", "/users/1/profile").unwrap();
    assert!(Arc::ptr_eq(&best, &literal));
}
