//! Tests for copy-on-write semantics and the no-op contracts.
//!
//! These verify that:
//! 1. Wrapping is idempotent and mirrors the source structure
//! 2. Mutations clone only the path to the mutation site and share the rest
//! 3. Every documented no-op returns the receiver by reference

use permafrost::{guid_of, Immutable, Path, PathInput, Source};
use serde_json::json;

fn wrap(value: serde_json::Value) -> Immutable {
    Immutable::create(Source::from(value)).unwrap()
}

// ============================================================================
// Wrapping
// ============================================================================

#[test]
fn test_create_is_idempotent() {
    let w = wrap(json!({"a": 1}));
    let again = Immutable::create(Source::from(&w)).unwrap();
    assert!(w.ptr_eq(&again), "re-wrapping must return the same instance");
}

#[test]
fn test_structural_mirroring() {
    let value = json!({
        "name": "root",
        "flags": [true, false],
        "nested": {"list": [{"n": 1}, {"n": 2}], "empty": {}},
    });
    let w = wrap(value.clone());
    // Serialization reproduces the source exactly.
    assert_eq!(w.to_json(), value);
    // And every path reads through to the same values.
    assert_eq!(w.get("name").unwrap().as_str(), Some("root"));
    assert_eq!(w.get("flags[1]").unwrap().as_bool(), Some(false));
    assert_eq!(w.get("nested.list[1].n").unwrap().as_i64(), Some(2));
}

#[test]
fn test_identifier_stability() {
    let source = Source::from(json!({"a": 1}));
    let id = guid_of(&source).unwrap();
    let w = Immutable::create(source).unwrap();
    assert_eq!(w.guid(), Some(&id));
}

// ============================================================================
// Copy-on-write sharing
// ============================================================================

#[test]
fn test_set_shares_untouched_subtrees() {
    let w = wrap(json!({"a": 1, "b": {"c": 2}}));
    let w2 = w.set("a", 2).unwrap();

    assert!(!w.ptr_eq(&w2));
    assert_eq!(w.get("a").unwrap().as_i64(), Some(1), "original untouched");
    assert_eq!(w2.get("a").unwrap().as_i64(), Some(2));
    assert!(
        w.get("b").unwrap().ptr_eq(&w2.get("b").unwrap()),
        "untouched subtree must be reference-shared"
    );
    assert_eq!(w.guid(), w2.guid(), "the root stays the same entity");
}

#[test]
fn test_end_to_end_scenario() {
    let w = wrap(json!({"a": "a", "b": [{}, {}]}));
    let w2 = w.set("b[0]", "x").unwrap();

    assert_eq!(w2.get("b[0]").unwrap().as_str(), Some("x"));
    assert!(w2.get("b[1]").unwrap().ptr_eq(&w.get("b[1]").unwrap()));

    // The original still holds its empty-object wrapper at b[0].
    let original = w.get("b[0]").unwrap();
    assert!(original.guid().is_some());
    assert!(original.is_empty());
    assert_eq!(w.guid(), w2.guid());
}

#[test]
fn test_set_deep_path_clones_only_the_spine() {
    let w = wrap(json!({"deep": {"deeper": {"x": 1}}, "side": {"y": 2}}));
    let w2 = w.set("deep.deeper.x", 9).unwrap();

    assert_eq!(w2.get("deep.deeper.x").unwrap().as_i64(), Some(9));
    // Spine nodes are new instances but keep their identities.
    assert!(!w.get("deep").unwrap().ptr_eq(&w2.get("deep").unwrap()));
    assert!(w.get("deep").unwrap().same(&w2.get("deep").unwrap()));
    // Off-spine subtrees are shared.
    assert!(w.get("side").unwrap().ptr_eq(&w2.get("side").unwrap()));
}

#[test]
fn test_set_creates_missing_final_key() {
    let w = wrap(json!({"a": {}}));
    let w2 = w.set("a.fresh", true).unwrap();
    assert_eq!(w2.get("a.fresh").unwrap().as_bool(), Some(true));
    assert_eq!(w.get("a.fresh"), None);
}

#[test]
fn test_set_root_replaces_wholesale() {
    let w = wrap(json!({"a": 1}));
    let replaced = w.set(Path::new(), Source::from(json!({"z": 9}))).unwrap();
    assert_eq!(replaced.get("z").unwrap().as_i64(), Some(9));
    assert_eq!(replaced.get("a"), None);
}

#[test]
fn test_set_root_with_primitive() {
    let w = wrap(json!({"a": 1}));
    let replaced = w.set(Path::new(), 42).unwrap();
    assert_eq!(replaced.as_i64(), Some(42));
}

// ============================================================================
// No-op contracts
// ============================================================================

#[test]
fn test_set_noop_contracts() {
    let w = wrap(json!({"a": 1}));

    assert!(w.set(PathInput::None, 5).unwrap().ptr_eq(&w), "no path");
    assert!(w.set("", 5).unwrap().ptr_eq(&w), "empty string path");
    assert!(w.set("a.b.c", 5).unwrap().ptr_eq(&w), "unreachable path");
    assert!(w.set("a", 1).unwrap().ptr_eq(&w), "unchanged leaf");
}

#[test]
fn test_remove_noop_contracts() {
    let w = wrap(json!({"a": 1}));

    assert!(w.remove(PathInput::None).ptr_eq(&w));
    assert!(w.remove("").ptr_eq(&w));
    assert!(w.remove("missing").ptr_eq(&w));
    assert!(w.remove(Path::new()).ptr_eq(&w), "empty path never cuts the root");
}

#[test]
fn test_update_noop_when_updater_declines() {
    let w = wrap(json!({"a": {"b": 1}}));
    let w2 = w.update("a.b", |_, _, _| None).unwrap();
    assert!(w2.ptr_eq(&w));
}

// ============================================================================
// update / remove / merge / clear
// ============================================================================

#[test]
fn test_update_leaf() {
    let w = wrap(json!({"count": {"value": 41}}));
    let w2 = w
        .update("count.value", |node, key, _top| {
            assert_eq!(key.map(|k| k.as_str()), Some("value"));
            Some(Source::from(node.as_i64().unwrap_or(0) + 1))
        })
        .unwrap();
    assert_eq!(w2.get("count.value").unwrap().as_i64(), Some(42));
    assert_eq!(w.get("count.value").unwrap().as_i64(), Some(41));
}

#[test]
fn test_update_root_applies_directly() {
    let w = wrap(json!({"a": 1}));
    let w2 = w
        .update(Path::new(), |node, key, top| {
            assert!(node.ptr_eq(&w));
            assert!(key.is_none() && top.is_none());
            Some(Source::from(json!({"b": 2})))
        })
        .unwrap();
    assert_eq!(w2.get("b").unwrap().as_i64(), Some(2));
}

#[test]
fn test_update_with_visits_path_nodes_leaf_to_root() {
    let w = wrap(json!({"a": {"b": 1}}));
    let mut seen: Vec<Option<String>> = Vec::new();
    {
        let seen = std::cell::RefCell::new(&mut seen);
        let w2 = w
            .update_with(
                "a.b",
                |_, _, _| Some(Source::from(2)),
                |_node, key, _top| {
                    seen.borrow_mut().push(key.map(|k| k.as_str().to_owned()));
                    None
                },
            )
            .unwrap();
        assert_eq!(w2.get("a.b").unwrap().as_i64(), Some(2));
    }
    assert_eq!(
        seen,
        vec![Some("b".to_owned()), Some("a".to_owned()), None],
        "path updater runs from the leaf up to the root"
    );
}

#[test]
fn test_remove_object_key_and_array_index() {
    let w = wrap(json!({"keep": 1, "drop": 2, "list": [10, 20, 30]}));

    let w2 = w.remove("drop");
    assert_eq!(w2.get("drop"), None);
    assert_eq!(w2.get("keep").unwrap().as_i64(), Some(1));

    let w3 = w2.remove("list[1]");
    assert_eq!(w3.get("list").unwrap().size(), 2);
    assert_eq!(w3.get("list[1]").unwrap().as_i64(), Some(30), "array splices");
    // Untouched siblings stay shared across all three trees.
    assert!(w.get("list").unwrap().ptr_eq(&w2.get("list").unwrap()));
}

#[test]
fn test_merge_shallow() {
    let w = wrap(json!({"a": 1, "b": {"c": 2}}));

    // Nothing differs: no-op by reference.
    assert!(w.merge(Source::from(json!({"a": 1}))).unwrap().ptr_eq(&w));

    let w2 = w.merge(Source::from(json!({"a": 5, "d": true}))).unwrap();
    assert_eq!(w2.get("a").unwrap().as_i64(), Some(5));
    assert_eq!(w2.get("d").unwrap().as_bool(), Some(true));
    assert!(w2.get("b").unwrap().ptr_eq(&w.get("b").unwrap()));
    assert_eq!(w.guid(), w2.guid());
}

#[test]
fn test_merge_deep() {
    let w = wrap(json!({"o": {"x": 1, "y": 2}}));
    let w2 = w.merge_deep(Source::from(json!({"o": {"x": 5}}))).unwrap();
    assert_eq!(w2.get("o.x").unwrap().as_i64(), Some(5));
    assert_eq!(w2.get("o.y").unwrap().as_i64(), Some(2), "deep merge keeps siblings");

    // Shallow merge replaces the whole nested object instead.
    let w3 = w.merge(Source::from(json!({"o": {"x": 5}}))).unwrap();
    assert_eq!(w3.get("o.y"), None);
}

#[test]
fn test_merge_shape_mismatch_replaces() {
    let w = wrap(json!({"a": 1}));
    let w2 = w.merge(Source::from(json!([1, 2]))).unwrap();
    assert!(w2.is_array());
    assert_eq!(w2.size(), 2);
}

#[test]
fn test_clear_keeps_identity_and_shape() {
    let obj = wrap(json!({"a": 1}));
    let cleared = obj.clear();
    assert!(cleared.is_empty());
    assert!(!cleared.is_array());
    assert_eq!(cleared.guid(), obj.guid());

    let arr = wrap(json!([1, 2]));
    let cleared = arr.clear();
    assert!(cleared.is_empty());
    assert!(cleared.is_array());
    assert_eq!(cleared.guid(), arr.guid());
}

// ============================================================================
// Navigation
// ============================================================================

#[test]
fn test_path_round_trip_for_every_node() {
    let w = wrap(json!({"a": {"b": [{"c": {}}, {"d": {}}]}}));
    let mut paths = vec![Path::new()];
    paths.push(w.path_of(&w.get("a").unwrap()).unwrap());
    paths.push(w.path_of(&w.get("a.b").unwrap()).unwrap());
    paths.push(w.path_of(&w.get("a.b[0].c").unwrap()).unwrap());
    paths.push(w.path_of(&w.get("a.b[1]").unwrap()).unwrap());

    for path in paths {
        let node = w.get(path.clone()).unwrap();
        assert_eq!(
            w.path_of(&node).unwrap(),
            path,
            "path/get must round-trip"
        );
    }
}

#[test]
fn test_has_and_primitives_are_not_members() {
    let w = wrap(json!({"a": {"b": 1}}));
    let a = w.get("a").unwrap();
    assert!(w.has(&a));
    assert!(w.has(&w));
    assert!(!w.has(&w.get("a.b").unwrap()), "leaves carry no identity");
    assert_eq!(w.path_of(&w.get("a.b").unwrap()), None);

    let stranger = wrap(json!({"x": 1}));
    assert!(!w.has(&stranger));
}
