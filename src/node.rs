use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;

use crate::{
    WzDirectoryParseError, WzFileParseError, WzImageParseError, WzNodeName, WzObjectType,
};

#[derive(Debug, Error)]
pub enum NodeParseError {
    #[error("error parsing WzDirectory: {0}")]
    WzDirectoryParseError(#[from] WzDirectoryParseError),

    #[error("error parsing WzFile: {0}")]
    WzFileParseError(#[from] WzFileParseError),

    #[error("error parsing WzImage: {0}")]
    WzImageParseError(#[from] WzImageParseError),

    #[error("node not found")]
    NodeNotFound,
}

/// One node of the archive tree.
///
/// Children keep their on-disk order; lookup by name is case-insensitive.
/// `modified` is set by the mutating operations below and consulted by the
/// writer's verbatim fast path; propagating it to ancestors is the
/// editor's concern.
#[derive(Debug)]
pub struct WzNode {
    pub name: WzNodeName,
    pub object_type: WzObjectType,
    pub modified: bool,
    pub parent: Weak<RwLock<WzNode>>,
    pub children: Vec<WzNodeArc>,
}

pub type WzNodeArc = Arc<RwLock<WzNode>>;
pub type WzNodeArcVec = Vec<WzNodeArc>;

impl From<WzNode> for WzNodeArc {
    fn from(node: WzNode) -> Self {
        node.into_lock()
    }
}

impl WzNode {
    pub fn new(
        name: &WzNodeName,
        object_type: impl Into<WzObjectType>,
        parent: Option<&WzNodeArc>,
    ) -> Self {
        Self {
            name: name.clone(),
            object_type: object_type.into(),
            modified: false,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            children: Vec::new(),
        }
    }
    pub fn from_str(
        name: &str,
        object_type: impl Into<WzObjectType>,
        parent: Option<&WzNodeArc>,
    ) -> Self {
        Self::new(&name.into(), object_type, parent)
    }

    pub fn into_lock(self) -> WzNodeArc {
        Arc::new(RwLock::new(self))
    }

    /// Populate children from the underlying object. Idempotent: a parsed
    /// node is left alone.
    pub fn parse(&mut self, self_arc: &WzNodeArc) -> Result<(), NodeParseError> {
        let childs: WzNodeArcVec = match &mut self.object_type {
            WzObjectType::Directory(directory) => {
                if directory.is_parsed {
                    return Ok(());
                }
                let childs = directory.resolve_children(self_arc)?;
                directory.is_parsed = true;
                childs
            }
            WzObjectType::File(file) => {
                if file.is_parsed {
                    return Ok(());
                }
                file.parse(self_arc, None)?
            }
            WzObjectType::Image(image) => {
                if image.is_parsed {
                    return Ok(());
                }
                let childs = image.resolve_children(self_arc)?;
                image.is_parsed = true;
                childs
            }
            _ => return Ok(()),
        };

        self.children = childs;

        Ok(())
    }

    /// Drop lazily parsed children so they can be reloaded from
    /// provenance later.
    pub fn unparse(&mut self) {
        match &mut self.object_type {
            WzObjectType::Directory(directory) => directory.is_parsed = false,
            WzObjectType::File(file) => file.is_parsed = false,
            WzObjectType::Image(image) => image.is_parsed = false,
            _ => return,
        }
        self.children.clear();
    }

    /// Child by case-insensitive name.
    pub fn at(&self, name: &str) -> Option<WzNodeArc> {
        self.children
            .iter()
            .find(|child| child.read().unwrap().name.matches(name))
            .map(Arc::clone)
    }
    pub fn at_relative(&self, path: &str) -> Option<WzNodeArc> {
        if path == ".." {
            self.parent.upgrade()
        } else {
            self.at(path)
        }
    }
    pub fn at_path(&self, path: &str) -> Option<WzNodeArc> {
        let mut pathes = path.split('/');
        let first = self.at(pathes.next()?)?;
        pathes.try_fold(first, |node, name| node.read().unwrap().at(name))
    }
    /// Like [`Self::at_path`] but resolves `..` segments, the shape UOL
    /// targets take.
    pub fn at_path_relative(&self, path: &str) -> Option<WzNodeArc> {
        let mut pathes = path.split('/');
        let first = self.at_relative(pathes.next()?)?;
        pathes.try_fold(first, |node, name| node.read().unwrap().at_relative(name))
    }
    /// Walk a path, parsing lazy nodes along the way.
    pub fn at_path_parsed(&self, path: &str) -> Result<WzNodeArc, NodeParseError> {
        let mut pathes = path.split('/');

        let first = self
            .at(pathes.next().ok_or(NodeParseError::NodeNotFound)?)
            .ok_or(NodeParseError::NodeNotFound)?;
        pathes.try_fold(first, |node, name| {
            let mut write = node.write().unwrap();
            write.parse(&node)?;
            write.at(name).ok_or(NodeParseError::NodeNotFound)
        })
    }

    /// Slash-joined absolute path from the tree root.
    pub fn get_full_path(&self) -> String {
        let mut path = self.name.to_string();
        let mut parent = self.parent.upgrade();
        while let Some(parent_inner) = parent {
            let read = parent_inner.read().unwrap();
            path = format!("{}/{}", &read.name, path);
            parent = read.parent.upgrade();
        }
        path
    }

    /// Nearest ancestor satisfying `cb`.
    pub fn filter_parent<F>(&self, cb: F) -> Option<WzNodeArc>
    where
        F: Fn(&WzNode) -> bool,
    {
        let mut parent = self.parent.upgrade();
        loop {
            if let Some(parent_inner) = parent {
                let read = parent_inner.read().unwrap();
                if cb(&read) {
                    break Some(Arc::clone(&parent_inner));
                }
                parent = read.parent.upgrade();
            } else {
                break None;
            }
        }
    }
    pub fn get_parent_wz_image(&self) -> Option<WzNodeArc> {
        self.filter_parent(|node| matches!(node.object_type, WzObjectType::Image(_)))
    }
}

/// Append `child` to `parent`'s child sequence and wire its back-reference.
pub fn add_child(parent: &WzNodeArc, child: WzNodeArc) {
    child.write().unwrap().parent = Arc::downgrade(parent);
    let mut write = parent.write().unwrap();
    write.children.push(child);
    write.modified = true;
}

/// Detach the child named `name` (case-insensitive), clearing its parent
/// back-reference. Provenance on the detached subtree survives, so an
/// undo re-insert can still hit the verbatim fast path.
pub fn remove_child(parent: &WzNodeArc, name: &str) -> Option<WzNodeArc> {
    let mut write = parent.write().unwrap();
    let index = write
        .children
        .iter()
        .position(|child| child.read().unwrap().name.matches(name))?;
    let child = write.children.remove(index);
    child.write().unwrap().parent = Weak::new();
    write.modified = true;
    Some(child)
}

/// Rename a node in place, keeping its children and provenance.
pub fn rename_node(node: &WzNodeArc, new_name: &str) {
    let mut write = node.write().unwrap();
    write.name = new_name.into();
    write.modified = true;
}

/// Whether any node in the subtree carries the modified flag.
pub fn is_subtree_modified(node: &WzNodeArc) -> bool {
    let read = node.read().unwrap();
    read.modified || read.children.iter().any(is_subtree_modified)
}

/// Re-wire every child's parent back-reference, e.g. after a tree was
/// transferred between threads by ownership.
pub fn resolve_childs_parent(node: &WzNodeArc) {
    let node_read = node.read().unwrap();
    for child in node_read.children.iter() {
        child.write().unwrap().parent = Arc::downgrade(node);
        resolve_childs_parent(child);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::property::WzValue;

    fn sample_tree() -> WzNodeArc {
        let root = WzNode::from_str("root", WzObjectType::Value(WzValue::Null), None).into_lock();
        for (name, value) in [("Alpha", 1), ("beta", 2)] {
            let child = WzNode::from_str(name, value, Some(&root)).into_lock();
            root.write().unwrap().children.push(child);
        }
        root
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let root = sample_tree();
        let read = root.read().unwrap();

        assert!(read.at("alpha").is_some());
        assert!(read.at("ALPHA").is_some());
        assert!(read.at("Beta").is_some());
        assert!(read.at("gamma").is_none());
    }

    #[test]
    fn test_child_order_preserved() {
        let root = sample_tree();
        let names: Vec<String> = root
            .read()
            .unwrap()
            .children
            .iter()
            .map(|c| c.read().unwrap().name.to_string())
            .collect();
        assert_eq!(names, ["Alpha", "beta"]);
    }

    #[test]
    fn test_add_remove_child() {
        let root = sample_tree();
        let extra = WzNode::from_str("extra", 3, None).into_lock();

        add_child(&root, Arc::clone(&extra));
        assert!(root.read().unwrap().modified);
        assert!(extra.read().unwrap().parent.upgrade().is_some());
        assert_eq!(extra.read().unwrap().get_full_path(), "root/extra");

        let removed = remove_child(&root, "EXTRA").unwrap();
        assert!(removed.read().unwrap().parent.upgrade().is_none());
        assert!(root.read().unwrap().at("extra").is_none());
    }

    #[test]
    fn test_rename_marks_modified() {
        let root = sample_tree();
        let child = root.read().unwrap().at("Alpha").unwrap();

        rename_node(&child, "Gamma");

        assert!(child.read().unwrap().modified);
        assert!(is_subtree_modified(&root));
        assert!(root.read().unwrap().at("gamma").is_some());
    }

    #[test]
    fn test_path_walks() {
        let root = sample_tree();
        let child = root.read().unwrap().at("Alpha").unwrap();
        let grand = WzNode::from_str("deep", 9, Some(&child)).into_lock();
        child.write().unwrap().children.push(Arc::clone(&grand));

        let read = root.read().unwrap();
        assert!(read.at_path("Alpha/deep").is_some());
        assert!(read.at_path("Alpha/missing").is_none());

        // UOL-style relative path from the grandchild
        let up = grand.read().unwrap().at_path_relative("../../beta");
        assert!(up.is_some());
    }
}
