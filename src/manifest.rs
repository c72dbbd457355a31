//! SCORM manifest parsing
//!
//! Parses `imsmanifest.xml` content into a structured [`Manifest`] tree:
//! organizations with nested items, a resource table, and (for SCORM 2004)
//! sequencing rules. Parsing is a pure function of the XML text; no file or
//! network access happens here.

use crate::error::{ManifestError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// SCORM specification version detected from a manifest.
///
/// Version detection precedence: explicit namespace markers (the 2004
/// sequencing/navigation namespaces win over the 1.2 content-packaging
/// namespace), then `schemaversion` text, then `Unknown`. Packages with an
/// `Unknown` version never extract successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScormVersion {
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "2004")]
    V2004,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ScormVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScormVersion::V1_2 => "1.2",
            ScormVersion::V2004 => "2004",
            ScormVersion::Unknown => "unknown",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ScormVersion::Unknown)
    }
}

impl std::fmt::Display for ScormVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed SCORM manifest.
///
/// # Example
///
/// ```rust
/// use scorm_engine::manifest::{parse_manifest, ScormVersion};
///
/// let xml = r#"
/// <manifest identifier="m1" xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_rootv1p2">
///   <organizations default="org1">
///     <organization identifier="org1">
///       <title>Course</title>
///       <item identifier="i1" identifierref="r1"><title>Lesson 1</title></item>
///     </organization>
///   </organizations>
///   <resources>
///     <resource identifier="r1" type="webcontent" href="index.html"/>
///   </resources>
/// </manifest>"#;
///
/// let manifest = parse_manifest(xml).unwrap();
/// assert_eq!(manifest.version, ScormVersion::V1_2);
/// assert_eq!(manifest.entry_point.as_deref(), Some("index.html"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: ScormVersion,
    pub identifier: Option<String>,
    pub default_organization: Option<String>,
    pub organizations: Vec<Organization>,
    pub resources: Vec<Resource>,
    /// Entry point resolved from the manifest alone (item/resource hrefs).
    /// File-list based fallbacks are applied by [`Manifest::resolve_entry_point`].
    pub entry_point: Option<String>,
    pub metadata: Option<ManifestMetadata>,
}

/// Schema metadata from the manifest `<metadata>` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub schema: Option<String>,
    pub schema_version: Option<String>,
}

/// A top-level grouping of content items.
///
/// `sequencing` holds organization-level rules that apply to every item in
/// the tree; only populated for SCORM 2004 manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub title: String,
    pub items: Vec<Item>,
    pub sequencing: Option<SequencingRules>,
}

/// A node in the content tree, optionally referencing a resource.
///
/// `sequencing` is only populated for SCORM 2004 manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub resource_ref: Option<String>,
    pub children: Vec<Item>,
    pub sequencing: Option<SequencingRules>,
}

/// A referenced content unit. `scorm_type` distinguishes trackable SCOs
/// from plain assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub scorm_type: Option<String>,
    pub href: Option<String>,
    pub files: Vec<String>,
    pub dependencies: Vec<String>,
}

impl Resource {
    /// True when the resource is a launchable content object.
    pub fn is_sco(&self) -> bool {
        self.scorm_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("sco"))
    }
}

/// SCORM 2004 sequencing rules attached to an item.
///
/// Rule *conditions* are parsed structurally; rule *evaluation* against
/// runtime state is not implemented and always permits (see
/// [`ConditionRule::evaluate`]). Control-mode restrictions (`choice`,
/// `forwardOnly`) are enforced by the navigation evaluator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SequencingRules {
    pub control_mode: Option<ControlMode>,
    pub pre_condition_rules: Vec<ConditionRule>,
    pub post_condition_rules: Vec<ConditionRule>,
    pub exit_condition_rules: Vec<ConditionRule>,
    pub limit_conditions: Option<LimitConditions>,
    pub objectives: Vec<Objective>,
    pub randomization: Option<RandomizationControls>,
    pub delivery_controls: Option<DeliveryControls>,
    pub completion_threshold: Option<f64>,
}

/// `<imsss:controlMode>` flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMode {
    pub choice: bool,
    pub choice_exit: bool,
    pub flow: bool,
    pub forward_only: bool,
}

impl Default for ControlMode {
    fn default() -> Self {
        Self {
            choice: true,
            choice_exit: true,
            flow: false,
            forward_only: false,
        }
    }
}

/// How multiple rule conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionCombination {
    #[default]
    All,
    Any,
}

/// A pre/post/exit sequencing rule: a set of conditions and an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub combination: ConditionCombination,
    pub conditions: Vec<RuleCondition>,
    pub action: String,
}

impl ConditionRule {
    /// Evaluates the rule against runtime state.
    ///
    /// Runtime-state tracking for rule conditions is not implemented; the
    /// rule always permits. Conditions are still parsed so callers can
    /// inspect them.
    pub fn evaluate(&self) -> bool {
        true
    }
}

/// A single condition inside a sequencing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub condition: String,
    pub operator: Option<String>,
    pub measure_threshold: Option<f64>,
    pub referenced_objective: Option<String>,
}

/// `<imsss:limitConditions>` attempt limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConditions {
    pub attempt_limit: Option<u32>,
    pub attempt_absolute_duration_limit: Option<String>,
}

/// A sequencing objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: Option<String>,
    pub primary: bool,
    pub satisfied_by_measure: bool,
    pub min_normalized_measure: Option<f64>,
}

/// `<imsss:randomizationControls>` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomizationControls {
    pub randomization_timing: Option<String>,
    pub select_count: Option<u32>,
    pub reorder_children: bool,
    pub selection_timing: Option<String>,
}

/// `<adlcp:deliveryControls>` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryControls {
    pub tracked: bool,
    pub completion_set_by_content: bool,
    pub objective_set_by_content: bool,
}

/// Common launch filenames checked when a manifest carries no usable href.
const COMMON_ENTRY_FILES: &[&str] = &[
    "index.html",
    "index.htm",
    "story.html",
    "launch.html",
    "default.html",
    "main.html",
];

const HTML_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

// Namespace markers used for version detection. The 2004 markers take
// precedence over the 1.2 marker when both appear.
const NS_2004_MARKERS: &[&str] = &[
    "http://www.imsglobal.org/xsd/imsss",
    "http://www.adlnet.org/xsd/adlseq",
    "http://www.adlnet.org/xsd/adlnav",
];
const NS_1_2_MARKERS: &[&str] = &[
    "http://www.adlnet.org/xsd/adlcp_rootv1p2",
    "http://www.imsproject.org/xsd/imscp_rootv1p1p2",
];

impl Manifest {
    /// Looks up a resource by identifier.
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Looks up an organization by identifier.
    pub fn organization(&self, id: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.id == id)
    }

    /// Returns the default organization, falling back to the first one.
    pub fn default_org(&self) -> Option<&Organization> {
        self.default_organization
            .as_deref()
            .and_then(|id| self.organization(id))
            .or_else(|| self.organizations.first())
    }

    /// Resolves the href behind an item's resource reference, if any.
    pub fn item_href(&self, item: &Item) -> Option<&str> {
        let resource = self.resource(item.resource_ref.as_deref()?)?;
        resource.href.as_deref()
    }

    /// Resolves the package entry point through the deterministic fallback
    /// chain: an explicit entry point, then the manifest-derived entry point
    /// (first depth-first item whose resource has an href, then first SCO
    /// resource href), then a known launch filename from the extracted file
    /// list, then the first HTML-like file.
    ///
    /// Fails with [`ManifestError::NoEntryPoint`] when nothing matches.
    pub fn resolve_entry_point(&self, explicit: Option<&str>, files: &[String]) -> Result<String> {
        if let Some(explicit) = explicit
            && !explicit.is_empty()
        {
            return Ok(explicit.to_string());
        }

        if let Some(entry) = &self.entry_point {
            return Ok(entry.clone());
        }

        for file in files {
            let name = file.rsplit('/').next().unwrap_or(file);
            if COMMON_ENTRY_FILES
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate))
            {
                return Ok(file.clone());
            }
        }

        for file in files {
            let extension = file.rsplit('.').next().unwrap_or("");
            if HTML_EXTENSIONS
                .iter()
                .any(|candidate| extension.eq_ignore_ascii_case(candidate))
            {
                return Ok(file.clone());
            }
        }

        Err(ManifestError::NoEntryPoint.into())
    }
}

/// Parses `imsmanifest.xml` text into a [`Manifest`].
///
/// Organizations and items are parsed recursively, preserving child order.
/// Singular or plural `<file>`/`<dependency>` constructs are flattened into
/// arrays uniformly. Sequencing rules are parsed for SCORM 2004 only.
pub fn parse_manifest(xml: &str) -> Result<Manifest> {
    let root = parse_xml_tree(xml)?;
    if root.local_name() != "manifest" {
        return Err(ManifestError::InvalidPackage {
            message: format!("root element is <{}>, expected <manifest>", root.name),
        }
        .into());
    }

    let metadata = root.child("metadata").map(|node| ManifestMetadata {
        schema: node.child_text("schema"),
        schema_version: node.child_text("schemaversion"),
    });

    let version = detect_version(xml, metadata.as_ref());
    debug!(version = %version, "detected manifest version");

    let mut default_organization = None;
    let mut organizations = Vec::new();
    if let Some(orgs_node) = root.child("organizations") {
        default_organization = orgs_node.attr("default").map(str::to_string);
        for org_node in orgs_node.children_named("organization") {
            organizations.push(parse_organization(org_node, version));
        }
    }

    let mut resources = Vec::new();
    if let Some(res_node) = root.child("resources") {
        for resource_node in res_node.children_named("resource") {
            resources.push(parse_resource(resource_node));
        }
    }

    let mut manifest = Manifest {
        version,
        identifier: root.attr("identifier").map(str::to_string),
        default_organization,
        organizations,
        resources,
        entry_point: None,
        metadata,
    };
    manifest.entry_point = manifest_entry_point(&manifest);

    Ok(manifest)
}

/// Manifest-derived entry point: the first depth-first item with an href'd
/// resource, then the first SCO-typed resource with an href.
fn manifest_entry_point(manifest: &Manifest) -> Option<String> {
    fn scan_items<'a>(manifest: &'a Manifest, items: &'a [Item]) -> Option<&'a str> {
        for item in items {
            if let Some(href) = manifest.item_href(item) {
                return Some(href);
            }
            if let Some(href) = scan_items(manifest, &item.children) {
                return Some(href);
            }
        }
        None
    }

    for org in &manifest.organizations {
        if let Some(href) = scan_items(manifest, &org.items) {
            return Some(href.to_string());
        }
    }

    manifest
        .resources
        .iter()
        .find(|r| r.is_sco() && r.href.is_some())
        .and_then(|r| r.href.clone())
}

fn detect_version(xml: &str, metadata: Option<&ManifestMetadata>) -> ScormVersion {
    if NS_2004_MARKERS.iter().any(|marker| xml.contains(marker)) {
        return ScormVersion::V2004;
    }
    if NS_1_2_MARKERS.iter().any(|marker| xml.contains(marker)) {
        return ScormVersion::V1_2;
    }

    if let Some(schema_version) = metadata.and_then(|m| m.schema_version.as_deref()) {
        if schema_version.contains("2004") || schema_version.contains("1.3") {
            return ScormVersion::V2004;
        }
        if schema_version.contains("1.2") {
            return ScormVersion::V1_2;
        }
    }

    ScormVersion::Unknown
}

fn parse_organization(node: &XmlNode, version: ScormVersion) -> Organization {
    let id = node.attr("identifier").unwrap_or("").to_string();
    let title = node.child_text("title").unwrap_or_else(|| id.clone());
    let items = node
        .children_named("item")
        .map(|item| parse_item(item, version))
        .collect();
    let sequencing = if version == ScormVersion::V2004 {
        node.child("sequencing").map(parse_sequencing)
    } else {
        None
    };
    Organization {
        id,
        title,
        items,
        sequencing,
    }
}

fn parse_item(node: &XmlNode, version: ScormVersion) -> Item {
    let id = node.attr("identifier").unwrap_or("").to_string();
    let title = node.child_text("title").unwrap_or_else(|| id.clone());
    let resource_ref = node.attr("identifierref").map(str::to_string);
    let children = node
        .children_named("item")
        .map(|child| parse_item(child, version))
        .collect();
    let sequencing = if version == ScormVersion::V2004 {
        node.child("sequencing").map(parse_sequencing)
    } else {
        None
    };

    Item {
        id,
        title,
        resource_ref,
        children,
        sequencing,
    }
}

fn parse_resource(node: &XmlNode) -> Resource {
    let files = node
        .children_named("file")
        .filter_map(|file| file.attr("href"))
        .map(str::to_string)
        .collect();
    let dependencies = node
        .children_named("dependency")
        .filter_map(|dep| dep.attr("identifierref"))
        .map(str::to_string)
        .collect();

    Resource {
        id: node.attr("identifier").unwrap_or("").to_string(),
        resource_type: node.attr("type").unwrap_or("webcontent").to_string(),
        scorm_type: node.attr("scormtype").or(node.attr("scormType")).map(str::to_string),
        href: node.attr("href").map(str::to_string),
        files,
        dependencies,
    }
}

fn parse_sequencing(node: &XmlNode) -> SequencingRules {
    let control_mode = node.child("controlMode").map(|cm| ControlMode {
        choice: cm.attr_bool("choice", true),
        choice_exit: cm.attr_bool("choiceExit", true),
        flow: cm.attr_bool("flow", false),
        forward_only: cm.attr_bool("forwardOnly", false),
    });

    let mut pre_condition_rules = Vec::new();
    let mut post_condition_rules = Vec::new();
    let mut exit_condition_rules = Vec::new();
    if let Some(rules_node) = node.child("sequencingRules") {
        for rule in rules_node.children_named("preConditionRule") {
            pre_condition_rules.push(parse_condition_rule(rule));
        }
        for rule in rules_node.children_named("postConditionRule") {
            post_condition_rules.push(parse_condition_rule(rule));
        }
        for rule in rules_node.children_named("exitConditionRule") {
            exit_condition_rules.push(parse_condition_rule(rule));
        }
    }

    let limit_conditions = node.child("limitConditions").map(|lc| LimitConditions {
        attempt_limit: lc.attr("attemptLimit").and_then(|v| v.parse().ok()),
        attempt_absolute_duration_limit: lc
            .attr("attemptAbsoluteDurationLimit")
            .map(str::to_string),
    });

    let mut objectives = Vec::new();
    if let Some(obj_node) = node.child("objectives") {
        for primary in obj_node.children_named("primaryObjective") {
            objectives.push(parse_objective(primary, true));
        }
        for objective in obj_node.children_named("objective") {
            objectives.push(parse_objective(objective, false));
        }
    }

    let randomization = node
        .child("randomizationControls")
        .map(|rc| RandomizationControls {
            randomization_timing: rc.attr("randomizationTiming").map(str::to_string),
            select_count: rc.attr("selectCount").and_then(|v| v.parse().ok()),
            reorder_children: rc.attr_bool("reorderChildren", false),
            selection_timing: rc.attr("selectionTiming").map(str::to_string),
        });

    let delivery_controls = node.child("deliveryControls").map(|dc| DeliveryControls {
        tracked: dc.attr_bool("tracked", true),
        completion_set_by_content: dc.attr_bool("completionSetByContent", false),
        objective_set_by_content: dc.attr_bool("objectiveSetByContent", false),
    });

    let completion_threshold = node.child("completionThreshold").and_then(|ct| {
        ct.attr("minProgressMeasure")
            .and_then(|v| v.parse().ok())
            .or_else(|| ct.text.trim().parse().ok())
    });

    SequencingRules {
        control_mode,
        pre_condition_rules,
        post_condition_rules,
        exit_condition_rules,
        limit_conditions,
        objectives,
        randomization,
        delivery_controls,
        completion_threshold,
    }
}

fn parse_condition_rule(node: &XmlNode) -> ConditionRule {
    let mut combination = ConditionCombination::All;
    let mut conditions = Vec::new();
    if let Some(conds) = node.child("ruleConditions") {
        if conds
            .attr("conditionCombination")
            .is_some_and(|v| v.eq_ignore_ascii_case("any"))
        {
            combination = ConditionCombination::Any;
        }
        for cond in conds.children_named("ruleCondition") {
            conditions.push(RuleCondition {
                condition: cond.attr("condition").unwrap_or("always").to_string(),
                operator: cond.attr("operator").map(str::to_string),
                measure_threshold: cond.attr("measureThreshold").and_then(|v| v.parse().ok()),
                referenced_objective: cond.attr("referencedObjective").map(str::to_string),
            });
        }
    }
    let action = node
        .child("ruleAction")
        .and_then(|a| a.attr("action"))
        .unwrap_or("")
        .to_string();

    ConditionRule {
        combination,
        conditions,
        action,
    }
}

fn parse_objective(node: &XmlNode, primary: bool) -> Objective {
    Objective {
        id: node.attr("objectiveID").map(str::to_string),
        primary,
        satisfied_by_measure: node.attr_bool("satisfiedByMeasure", false),
        min_normalized_measure: node
            .child("minNormalizedMeasure")
            .and_then(|n| n.text.trim().parse().ok()),
    }
}

// Minimal DOM built from quick-xml events. Manifests are small, so holding
// the whole tree is cheaper than a streaming state machine here.
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Attribute lookup by local name (namespace prefixes ignored).
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| local(key) == name)
            .map(|(_, value)| value.as_str())
    }

    fn attr_bool(&self, name: &str, default: bool) -> bool {
        match self.attr(name) {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    fn child(&self, local_name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find(|child| child.local_name() == local_name)
    }

    fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children
            .iter()
            .filter(move |child| child.local_name() == local_name)
    }

    fn child_text(&self, local_name: &str) -> Option<String> {
        let text = self.child(local_name)?.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn parse_xml_tree(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                stack.push(node_from_event(&e));
            }
            Event::Empty(e) => {
                let node = node_from_event(&e);
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| ManifestError::ParseFailed {
                    message: "unbalanced closing tag".to_string(),
                })?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    let text = t.unescape().map(|v| v.into_owned()).unwrap_or_default();
                    current.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ManifestError::ParseFailed {
            message: "unexpected end of document".to_string(),
        }
        .into());
    }

    root.ok_or_else(|| {
        ManifestError::ParseFailed {
            message: "document has no root element".to_string(),
        }
        .into()
    })
}

fn node_from_event(e: &quick_xml::events::BytesStart<'_>) -> XmlNode {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attrs = e
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            (key, value)
        })
        .collect();

    XmlNode {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    }
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    }
}
