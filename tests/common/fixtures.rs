//! Manifest and package fixtures shared across tests

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

/// A small but complete SCORM 1.2 manifest with one organization and two
/// items, the first a SCO and the second an asset.
pub const SCORM_12_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="course-12" version="1.0"
    xmlns="http://www.imsproject.org/xsd/imscp_rootv1p1p2"
    xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_rootv1p2">
  <metadata>
    <schema>ADL SCORM</schema>
    <schemaversion>1.2</schemaversion>
  </metadata>
  <organizations default="org-1">
    <organization identifier="org-1">
      <title>Intro Course</title>
      <item identifier="item-1" identifierref="res-1">
        <title>Lesson One</title>
      </item>
      <item identifier="item-2" identifierref="res-2">
        <title>Reference Material</title>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="res-1" type="webcontent" adlcp:scormtype="sco" href="lesson1.html">
      <file href="lesson1.html"/>
      <file href="shared/player.js"/>
    </resource>
    <resource identifier="res-2" type="webcontent" adlcp:scormtype="asset" href="reference.html">
      <file href="reference.html"/>
    </resource>
  </resources>
</manifest>"#;

/// A SCORM 2004 manifest with nested items and sequencing rules: choice
/// disabled on the root and forward-only on the second module.
pub const SCORM_2004_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="course-2004" version="1.0"
    xmlns="http://www.imsglobal.org/xsd/imscp_v1p1"
    xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_v1p3"
    xmlns:imsss="http://www.imsglobal.org/xsd/imsss">
  <metadata>
    <schema>ADL SCORM</schema>
    <schemaversion>2004 4th Edition</schemaversion>
  </metadata>
  <organizations default="org-main">
    <organization identifier="org-main">
      <title>Certification Track</title>
      <item identifier="mod-1" identifierref="res-a">
        <title>Module One</title>
      </item>
      <item identifier="mod-2">
        <title>Module Two</title>
        <item identifier="mod-2-1" identifierref="res-b">
          <title>Part One</title>
        </item>
        <item identifier="mod-2-2" identifierref="res-c">
          <title>Part Two</title>
        </item>
        <imsss:sequencing>
          <imsss:controlMode choice="true" flow="true" forwardOnly="true"/>
        </imsss:sequencing>
      </item>
      <imsss:sequencing>
        <imsss:controlMode choice="false" flow="true"/>
      </imsss:sequencing>
    </organization>
  </organizations>
  <resources>
    <resource identifier="res-a" type="webcontent" adlcp:scormType="sco" href="a/index.html"/>
    <resource identifier="res-b" type="webcontent" adlcp:scormType="sco" href="b/part1.html"/>
    <resource identifier="res-c" type="webcontent" adlcp:scormType="sco" href="b/part2.html"/>
  </resources>
</manifest>"#;

/// A manifest with no version markers at all.
pub const UNVERSIONED_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="mystery">
  <resources>
    <resource identifier="r1" type="webcontent" href="index.html"/>
  </resources>
</manifest>"#;

/// Builds an in-memory zip archive from (path, bytes) entries.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut buffer);
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
    buffer.into_inner()
}

/// A complete SCORM 1.2 package archive matching [`SCORM_12_MANIFEST`].
pub fn scorm_12_package() -> Vec<u8> {
    build_zip(&[
        ("imsmanifest.xml", SCORM_12_MANIFEST.as_bytes()),
        ("lesson1.html", b"<html><body>Lesson One</body></html>"),
        ("reference.html", b"<html><body>Reference</body></html>"),
        ("shared/player.js", b"window.player = {};"),
    ])
}

/// The same package wrapped in a top-level directory, the way most
/// authoring tools export.
pub fn scorm_12_package_nested() -> Vec<u8> {
    build_zip(&[
        ("course/imsmanifest.xml", SCORM_12_MANIFEST.as_bytes()),
        ("course/lesson1.html", b"<html><body>Lesson One</body></html>"),
        ("course/reference.html", b"<html><body>Reference</body></html>"),
        ("course/shared/player.js", b"window.player = {};"),
    ])
}

/// A package whose manifest carries no recognizable SCORM version.
pub fn unversioned_package() -> Vec<u8> {
    build_zip(&[
        ("imsmanifest.xml", UNVERSIONED_MANIFEST.as_bytes()),
        ("index.html", b"<html/>"),
    ])
}

/// An archive with no manifest at all.
pub fn manifestless_package() -> Vec<u8> {
    build_zip(&[("index.html", b"<html/>")])
}
