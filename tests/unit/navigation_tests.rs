//! Navigation tree and sequencing tests against full package fixtures

use crate::common::fixtures::{SCORM_12_MANIFEST, SCORM_2004_MANIFEST};
use scorm_engine::manifest::parse_manifest;
use scorm_engine::navigation::{build_navigation_tree, find_next, is_navigation_allowed};

#[test]
fn test_tree_from_1_2_fixture() {
    let manifest = parse_manifest(SCORM_12_MANIFEST).unwrap();
    let tree = build_navigation_tree(&manifest);
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].title, "Intro Course");
    assert_eq!(tree[0].children.len(), 2);
    assert_eq!(tree[0].children[0].path.as_deref(), Some("lesson1.html"));
    assert!(tree[0].children[1].has_content);
}

#[test]
fn test_1_2_navigation_is_unrestricted() {
    let manifest = parse_manifest(SCORM_12_MANIFEST).unwrap();
    assert!(is_navigation_allowed(&manifest, "item-2", "item-1").is_ok());
    assert!(is_navigation_allowed(&manifest, "item-1", "item-2").is_ok());
}

#[test]
fn test_2004_forward_only_inside_module_two() {
    let manifest = parse_manifest(SCORM_2004_MANIFEST).unwrap();

    // Within module two, forward movement is fine and backtracking is not.
    assert!(is_navigation_allowed(&manifest, "mod-2-1", "mod-2-2").is_ok());
    assert!(is_navigation_allowed(&manifest, "mod-2-2", "mod-2-1").is_err());
}

#[test]
fn test_2004_root_choice_disabled_pins_jumps_to_adjacent() {
    let manifest = parse_manifest(SCORM_2004_MANIFEST).unwrap();

    // The organization disables choice, so stepping to the next item is the
    // only move open from module one.
    assert!(is_navigation_allowed(&manifest, "mod-1", "mod-2").is_ok());
    assert!(is_navigation_allowed(&manifest, "mod-1", "mod-2-2").is_err());
}

#[test]
fn test_2004_find_next_walks_into_children() {
    let manifest = parse_manifest(SCORM_2004_MANIFEST).unwrap();
    assert_eq!(find_next(&manifest, "mod-1"), Some("mod-2".to_string()));
    assert_eq!(find_next(&manifest, "mod-2"), Some("mod-2-1".to_string()));
    assert_eq!(find_next(&manifest, "mod-2-2"), None);
}
