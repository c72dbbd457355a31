//! Navigation tree building and sequencing evaluation
//!
//! Turns a parsed [`Manifest`] into a navigable tree and validates move
//! requests against SCORM 2004 control modes. For SCORM 1.2 manifests all
//! navigation is allowed.

use crate::error::NavigationError;
use crate::manifest::{Item, Manifest, Organization, ScormVersion, SequencingRules};
use serde::{Deserialize, Serialize};

/// A node in the navigation tree shown to the learner.
///
/// One synthetic root is produced per organization; its children mirror the
/// manifest items. `has_content` is true iff the item references a resource
/// with an `href`, and `path` carries that href.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationItem {
    pub id: String,
    pub title: String,
    pub has_content: bool,
    pub path: Option<String>,
    pub children: Vec<NavigationItem>,
}

/// Builds the navigation tree for every organization in the manifest.
pub fn build_navigation_tree(manifest: &Manifest) -> Vec<NavigationItem> {
    manifest
        .organizations
        .iter()
        .map(|org| NavigationItem {
            id: org.id.clone(),
            title: org.title.clone(),
            has_content: false,
            path: None,
            children: org
                .items
                .iter()
                .map(|item| build_item(manifest, item))
                .collect(),
        })
        .collect()
}

fn build_item(manifest: &Manifest, item: &Item) -> NavigationItem {
    let path = manifest.item_href(item).map(str::to_string);
    NavigationItem {
        id: item.id.clone(),
        title: item.title.clone(),
        has_content: path.is_some(),
        path,
        children: item
            .children
            .iter()
            .map(|child| build_item(manifest, child))
            .collect(),
    }
}

/// Flattened document order of all manifest items (organizations excluded),
/// depth-first, preserving child order.
pub fn document_order(manifest: &Manifest) -> Vec<&Item> {
    fn walk<'a>(items: &'a [Item], out: &mut Vec<&'a Item>) {
        for item in items {
            out.push(item);
            walk(&item.children, out);
        }
    }

    let mut order = Vec::new();
    for org in &manifest.organizations {
        walk(&org.items, &mut order);
    }
    order
}

fn ancestors<'a>(
    manifest: &'a Manifest,
    id: &str,
) -> Option<(&'a Organization, Vec<&'a Item>)> {
    fn walk<'a>(items: &'a [Item], id: &str, chain: &mut Vec<&'a Item>) -> bool {
        for item in items {
            chain.push(item);
            if item.id == id || walk(&item.children, id, chain) {
                return true;
            }
            chain.pop();
        }
        false
    }

    for org in &manifest.organizations {
        let mut chain = Vec::new();
        if walk(&org.items, id, &mut chain) {
            return Some((org, chain));
        }
    }
    None
}

/// Applies one sequencing block's constraints to the requested move.
fn check_sequencing(
    sequencing: Option<&SequencingRules>,
    holder_id: &str,
    from: &str,
    to: &str,
    from_index: usize,
    to_index: usize,
) -> Result<(), NavigationError> {
    let Some(sequencing) = sequencing else {
        return Ok(());
    };

    if let Some(control_mode) = sequencing.control_mode.as_ref() {
        if !control_mode.choice {
            let adjacent = to_index == from_index + 1 || to_index + 1 == from_index;
            if !adjacent {
                return Err(NavigationError::Denied {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: format!(
                        "choice navigation disabled by {holder_id}, target must be adjacent"
                    ),
                });
            }
        }

        if control_mode.forward_only && to_index < from_index {
            return Err(NavigationError::Denied {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("forward-only navigation enforced by {holder_id}"),
            });
        }
    }

    for rule in &sequencing.pre_condition_rules {
        // Always permits; kept on the enforcement path so rule state is
        // wired in one place once runtime tracking lands.
        if !rule.evaluate() {
            return Err(NavigationError::Denied {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("pre-condition rule on {holder_id}"),
            });
        }
    }

    Ok(())
}

/// Validates a navigation request from `from` to `to`.
///
/// Non-2004 manifests permit every move. For SCORM 2004 the ancestor chain
/// of `from` is walked from most- to least-specific, ending with the
/// containing organization; at each holder with a `controlMode`:
///
/// - `choice = false` requires the target to be adjacent to `from` in
///   document order;
/// - `forwardOnly = true` requires the target's document-order index not to
///   decrease.
///
/// Pre/post-condition rules are parsed but their evaluation always permits
/// (see [`crate::manifest::ConditionRule::evaluate`]); only control modes
/// are enforced here.
pub fn is_navigation_allowed(
    manifest: &Manifest,
    from: &str,
    to: &str,
) -> Result<(), NavigationError> {
    if manifest.version != ScormVersion::V2004 {
        return Ok(());
    }

    let order = document_order(manifest);
    let from_index = order.iter().position(|item| item.id == from);
    let to_index = order.iter().position(|item| item.id == to);
    let (Some(from_index), Some(to_index)) = (from_index, to_index) else {
        let missing = if from_index.is_none() { from } else { to };
        return Err(NavigationError::ItemNotFound {
            id: missing.to_string(),
        });
    };

    let Some((org, chain)) = ancestors(manifest, from) else {
        return Err(NavigationError::ItemNotFound {
            id: from.to_string(),
        });
    };

    for ancestor in chain.iter().rev() {
        check_sequencing(
            ancestor.sequencing.as_ref(),
            &ancestor.id,
            from,
            to,
            from_index,
            to_index,
        )?;
    }
    check_sequencing(
        org.sequencing.as_ref(),
        &org.id,
        from,
        to,
        from_index,
        to_index,
    )?;

    Ok(())
}

/// Finds the next allowed item after `current` in document order.
///
/// Candidates that fail [`is_navigation_allowed`] are skipped. Returns
/// `None` when no later item is reachable.
pub fn find_next(manifest: &Manifest, current: &str) -> Option<String> {
    let order = document_order(manifest);
    let position = order.iter().position(|item| item.id == current)?;
    order[position + 1..]
        .iter()
        .find(|candidate| is_navigation_allowed(manifest, current, &candidate.id).is_ok())
        .map(|candidate| candidate.id.clone())
}

/// Finds the closest allowed item before `current` in document order.
pub fn find_previous(manifest: &Manifest, current: &str) -> Option<String> {
    let order = document_order(manifest);
    let position = order.iter().position(|item| item.id == current)?;
    order[..position]
        .iter()
        .rev()
        .find(|candidate| is_navigation_allowed(manifest, current, &candidate.id).is_ok())
        .map(|candidate| candidate.id.clone())
}
