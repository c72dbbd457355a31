//! Manifest parsing tests against full package fixtures

use crate::common::fixtures::{SCORM_12_MANIFEST, SCORM_2004_MANIFEST, UNVERSIONED_MANIFEST};
use scorm_engine::manifest::{ScormVersion, parse_manifest};

#[test]
fn test_full_1_2_manifest() {
    let manifest = parse_manifest(SCORM_12_MANIFEST).unwrap();
    assert_eq!(manifest.version, ScormVersion::V1_2);
    assert_eq!(manifest.identifier.as_deref(), Some("course-12"));

    let org = manifest.default_org().unwrap();
    assert_eq!(org.title, "Intro Course");
    assert_eq!(org.items.len(), 2);
    assert_eq!(org.items[0].title, "Lesson One");

    let sco = manifest.resource("res-1").unwrap();
    assert!(sco.is_sco());
    assert_eq!(sco.files.len(), 2);
    let asset = manifest.resource("res-2").unwrap();
    assert!(!asset.is_sco());

    // Entry point is the first item's resource href.
    assert_eq!(manifest.entry_point.as_deref(), Some("lesson1.html"));

    let metadata = manifest.metadata.as_ref().unwrap();
    assert_eq!(metadata.schema.as_deref(), Some("ADL SCORM"));
    assert_eq!(metadata.schema_version.as_deref(), Some("1.2"));
}

#[test]
fn test_full_2004_manifest() {
    let manifest = parse_manifest(SCORM_2004_MANIFEST).unwrap();
    assert_eq!(manifest.version, ScormVersion::V2004);

    let org = manifest.default_org().unwrap();
    assert_eq!(org.items.len(), 2);

    // Organization-level sequencing: choice is disabled across the track.
    let org_control = org
        .sequencing
        .as_ref()
        .unwrap()
        .control_mode
        .as_ref()
        .unwrap();
    assert!(!org_control.choice);
    assert!(org_control.flow);

    let module_two = &org.items[1];
    assert_eq!(module_two.children.len(), 2);
    let sequencing = module_two.sequencing.as_ref().unwrap();
    let control_mode = sequencing.control_mode.as_ref().unwrap();
    assert!(control_mode.choice);
    assert!(control_mode.forward_only);

    // capitalized scormType attribute variant
    assert!(manifest.resource("res-a").unwrap().is_sco());
    assert_eq!(manifest.entry_point.as_deref(), Some("a/index.html"));
}

#[test]
fn test_unversioned_manifest_parses_as_unknown() {
    let manifest = parse_manifest(UNVERSIONED_MANIFEST).unwrap();
    assert_eq!(manifest.version, ScormVersion::Unknown);
    assert!(!manifest.version.is_supported());
}
