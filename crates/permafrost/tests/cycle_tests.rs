//! Tests for cyclic and shared structure.
//!
//! Cycle detection runs against the whole root, not just the ancestor
//! chain: any re-entry into an already-visited node — a true cycle or a
//! DAG-style shared child — is cut into a cycle-reference leaf that
//! resolves through the root's path-link table.

use permafrost::{guid_of, Immutable, Source, SourceObject};
use serde_json::json;

fn wrap(value: serde_json::Value) -> Immutable {
    Immutable::create(Source::from(value)).unwrap()
}

#[test]
fn test_self_cycle() {
    let a = SourceObject::new();
    a.insert("self", Source::Object(a.clone()));
    let id = guid_of(&Source::Object(a.clone())).unwrap();

    let w = Immutable::create(a).unwrap();
    let cycle = w.get("self").unwrap();
    assert!(cycle.is_cycle_ref());
    assert_eq!(cycle.value_of().as_str(), Some(id.as_str()));
    assert_eq!(cycle.cycle_target(), Some(&id));
    assert!(w.has_cycle_refs());
}

#[test]
fn test_cycle_wrapping_terminates_at_depth() {
    // root -> c0 -> c1 -> ... -> c99 -> root
    let root = SourceObject::new();
    let mut current = root.clone();
    for i in 0..100 {
        let next = SourceObject::new();
        current.insert("tag", i as i64);
        current.insert("next", Source::Object(next.clone()));
        current = next;
    }
    current.insert("next", Source::Object(root.clone()));

    let w = Immutable::create(root).unwrap();
    assert!(w.has_cycle_refs());

    // 101 steps: past the last real node onto the back-reference.
    let mut deep = String::from("next");
    for _ in 0..100 {
        deep.push_str(".next");
    }
    assert!(w.get(deep.as_str()).unwrap().is_cycle_ref());
}

#[test]
fn test_cycle_resolves_through_root() {
    let a = SourceObject::new();
    a.insert("name", "a");
    a.insert("self", Source::Object(a.clone()));

    let w = Immutable::create(a).unwrap();
    // Reading through the reference lands on the real node's children.
    assert_eq!(w.get("self.name").unwrap().as_str(), Some("a"));
    // Chained references keep resolving.
    assert_eq!(w.get("self.self.name").unwrap().as_str(), Some("a"));
    assert!(w.get("self.self").unwrap().is_cycle_ref());
}

#[test]
fn test_set_through_cycle_updates_real_node() {
    let a = SourceObject::new();
    a.insert("name", "a");
    a.insert("self", Source::Object(a.clone()));

    let w = Immutable::create(a).unwrap();
    let w2 = w.set("self.name", "b").unwrap();
    assert_eq!(w2.get("name").unwrap().as_str(), Some("b"));
    assert_eq!(w.get("name").unwrap().as_str(), Some("a"));
}

#[test]
fn test_update_through_cycle() {
    let a = SourceObject::new();
    a.insert("count", 1);
    a.insert("self", Source::Object(a.clone()));

    let w = Immutable::create(a).unwrap();
    let w2 = w
        .update("self.count", |node, _, _| {
            Some(Source::from(node.as_i64().unwrap_or(0) + 1))
        })
        .unwrap();
    assert_eq!(w2.get("count").unwrap().as_i64(), Some(2));
}

#[test]
fn test_shared_child_becomes_reference() {
    let shared = SourceObject::new();
    shared.insert("tag", "shared");
    let shared_id = guid_of(&Source::Object(shared.clone())).unwrap();

    let root = SourceObject::new();
    root.insert("x", Source::Object(shared.clone()));
    root.insert("y", Source::Object(shared.clone()));

    let w = Immutable::create(root).unwrap();
    let x = w.get("x").unwrap();
    let y = w.get("y").unwrap();

    // First occurrence wraps for real, the second one references it.
    assert!(!x.is_cycle_ref());
    assert!(y.is_cycle_ref());
    assert_eq!(y.cycle_target(), Some(&shared_id));
    assert_eq!(w.path_of(shared_id).unwrap().to_string(), "$.x");

    // Reading through the reference reaches the real child.
    assert_eq!(w.get("y.tag").unwrap().as_str(), Some("shared"));
}

#[test]
fn test_cross_subtree_reference() {
    let shared = SourceObject::new();
    shared.insert("tag", "shared");

    let left = SourceObject::new();
    left.insert("child", Source::Object(shared.clone()));
    let right = SourceObject::new();
    right.insert("child", Source::Object(shared.clone()));

    let root = SourceObject::new();
    root.insert("left", Source::Object(left));
    root.insert("right", Source::Object(right));

    let w = Immutable::create(root).unwrap();
    assert!(!w.get("left.child").unwrap().is_cycle_ref());
    assert!(w.get("right.child").unwrap().is_cycle_ref());
    assert_eq!(w.get("right.child.tag").unwrap().as_str(), Some("shared"));
}

#[test]
fn test_cycle_ref_serialization_uses_sentinel() {
    let a = SourceObject::new();
    a.insert("self", Source::Object(a.clone()));
    let id = guid_of(&Source::Object(a.clone())).unwrap();

    let w = Immutable::create(a).unwrap();
    assert_eq!(
        w.to_json(),
        json!({"self": {"[[ImmutableCycleRef]]": id.as_str()}})
    );
}

#[test]
fn test_no_cycles_reports_false() {
    let w = wrap(json!({"a": {"b": 1}}));
    assert!(!w.has_cycle_refs());
    assert!(!w.get("a").unwrap().has_cycle_refs());
}

#[test]
fn test_mutation_preserves_cycle_structure() {
    let a = SourceObject::new();
    a.insert("name", "a");
    a.insert("self", Source::Object(a.clone()));

    let w = Immutable::create(a).unwrap();
    let w2 = w.set("name", "b").unwrap();

    // The re-wrapped tree still carries the reference, now pointing at
    // the (identity-preserving) new root.
    let cycle = w2.get("self").unwrap();
    assert!(cycle.is_cycle_ref());
    assert_eq!(cycle.cycle_target(), w2.guid());
    assert_eq!(w2.get("self.name").unwrap().as_str(), Some("b"));
}
