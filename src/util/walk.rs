use crate::{WzNode, WzNodeArc, WzObjectType};

/// Visit `node` and every descendant in child order. With `force_parse`,
/// lazy nodes are parsed on the way down and images unparsed again on the
/// way back up, so a whole-archive sweep stays in bounded memory.
pub fn walk_node(node: &WzNodeArc, force_parse: bool, f: &dyn Fn(&WzNodeArc)) {
    if force_parse {
        let _ = node.write().unwrap().parse(node);
    }

    f(node);

    for child in node.read().unwrap().children.iter() {
        walk_node(child, force_parse, f);
    }

    let is_image = matches!(node.read().unwrap().object_type, WzObjectType::Image(_));
    if force_parse && is_image {
        node.write().unwrap().unparse();
    }
}

/// Count descendants (the node itself included) satisfying `predicate`.
pub fn count_nodes_where(node: &WzNodeArc, predicate: &dyn Fn(&WzNode) -> bool) -> usize {
    let read = node.read().unwrap();
    let own = usize::from(predicate(&read));
    own + read
        .children
        .iter()
        .map(|child| count_nodes_where(child, predicate))
        .sum::<usize>()
}
