use crate::{NodeParseError, WzNodeArc, WzNodeCast};

/// Wrap around of `node.write().unwrap().parse(&node)`.
pub fn parse_node(node: &WzNodeArc) -> Result<(), NodeParseError> {
    node.write().unwrap().parse(node)
}

/// Resolve a UOL target against the link's own absolute path; `..`
/// segments collapse. A UOL path is always relative to the link's parent.
pub fn get_resolved_uol_path(path: &str, uol_path: &str) -> String {
    let mut pathes: Vec<&str> = path.split('/').collect();
    pathes.pop();
    for p in uol_path.split('/') {
        if p == ".." && !pathes.is_empty() {
            pathes.pop();
        } else {
            pathes.push(p);
        }
    }
    pathes.join("/")
}

/// Follow a UOL node to its target. Resolution reads the tree and never
/// mutates it; a dangling link yields `None`.
pub fn resolve_uol(node: &WzNodeArc) -> Option<WzNodeArc> {
    let target = {
        let read = node.read().unwrap();
        read.try_as_uol()?.get_string().ok()?
    };

    node.read()
        .unwrap()
        .at_path_relative(&format!("../{target}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::property::{WzString, WzSubProperty, WzValue};
    use crate::{WzNode, WzObjectType};
    use std::sync::Arc;

    #[test]
    fn test_resolved_uol_path() {
        assert_eq!(
            get_resolved_uol_path("a/b/c/link", "../sibling/target"),
            "a/b/sibling/target"
        );
        assert_eq!(get_resolved_uol_path("a/link", "other"), "a/other");
    }

    #[test]
    fn test_resolve_uol() {
        let root = WzNode::from_str(
            "root",
            WzObjectType::Property(WzSubProperty::Property),
            None,
        )
        .into_lock();

        let target = WzNode::from_str("target", 7, Some(&root)).into_lock();
        let link = WzNode::from_str(
            "link",
            WzObjectType::Value(WzValue::UOL(WzString::from_str("target"))),
            Some(&root),
        )
        .into_lock();

        root.write().unwrap().children.push(Arc::clone(&target));
        root.write().unwrap().children.push(Arc::clone(&link));

        let resolved = resolve_uol(&link).expect("link should resolve");
        assert!(Arc::ptr_eq(&resolved, &target));
    }
}
