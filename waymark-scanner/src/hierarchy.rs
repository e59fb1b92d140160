use crate::registry::{EntityId, EntityRegistry};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub parent: EntityId,
    pub child: EntityId,
    /// Relationship field on the child that produced the edge.
    pub via: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub edges: Vec<HierarchyEdge>,
    pub roots: Vec<EntityId>,
    /// Parents before children. Registration order when the graph has a cycle.
    pub order: Vec<EntityId>,
}

impl Hierarchy {
    pub fn children_of(&self, parent: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.parent == parent)
            .map(|e| e.child)
    }
}

/// Lowercase and drop separators, so `Customer_ID` and `customer id` compare
/// equal.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Infer parent/child edges from relationship field names and fill in
/// `parents`, `children` and `is_root` on every entity.
///
/// For each relationship field the first other entity whose normalized name
/// contains, or is contained in, the normalized field wins. Short or generic
/// field names can match the wrong entity.
pub fn build_hierarchy(registry: &mut EntityRegistry) -> Hierarchy {
    let names: Vec<(EntityId, String)> = registry
        .entities()
        .iter()
        .map(|e| (e.id, normalize_name(&e.name)))
        .collect();

    let mut edges: Vec<HierarchyEdge> = Vec::new();
    for entity in registry.entities() {
        for field in &entity.relationship_field_names {
            let wanted = normalize_name(field);
            if wanted.is_empty() {
                continue;
            }

            let parent = names.iter().find(|(id, name)| {
                *id != entity.id
                    && !name.is_empty()
                    && (wanted.contains(name.as_str()) || name.contains(wanted.as_str()))
            });

            if let Some((parent_id, _)) = parent {
                let duplicate = edges
                    .iter()
                    .any(|e| e.parent == *parent_id && e.child == entity.id);
                if !duplicate {
                    debug!(
                        child = %entity.name,
                        parent = %parent_id,
                        via = %field,
                        "Relationship found"
                    );
                    edges.push(HierarchyEdge {
                        parent: *parent_id,
                        child: entity.id,
                        via: field.clone(),
                    });
                }
            }
        }
    }

    for entity in registry.entities_mut() {
        entity.parents = BTreeSet::new();
        entity.children = BTreeSet::new();
    }
    for edge in &edges {
        if let Some(child) = registry.get_mut(edge.child) {
            child.parents.insert(edge.parent);
        }
        if let Some(parent) = registry.get_mut(edge.parent) {
            parent.children.insert(edge.child);
        }
    }

    let mut roots = Vec::new();
    for entity in registry.entities_mut() {
        entity.is_root = entity.parents.is_empty();
        if entity.is_root {
            roots.push(entity.id);
        }
    }

    let order = parents_first(registry, &edges);
    info!(
        entities = registry.len(),
        relationships = edges.len(),
        roots = roots.len(),
        "Hierarchy built"
    );

    Hierarchy {
        edges,
        roots,
        order,
    }
}

fn parents_first(registry: &EntityRegistry, edges: &[HierarchyEdge]) -> Vec<EntityId> {
    let mut graph: DiGraph<EntityId, ()> = DiGraph::new();
    let mut nodes: HashMap<EntityId, NodeIndex> = HashMap::new();
    for entity in registry.entities() {
        nodes.insert(entity.id, graph.add_node(entity.id));
    }
    for edge in edges {
        if let (Some(&parent), Some(&child)) = (nodes.get(&edge.parent), nodes.get(&edge.child)) {
            graph.add_edge(parent, child, ());
        }
    }

    match toposort(&graph, None) {
        Ok(sorted) => sorted.into_iter().map(|ix| graph[ix]).collect(),
        Err(cycle) => {
            debug!(at = %graph[cycle.node_id()], "Hierarchy has a cycle, keeping discovery order");
            registry.entities().iter().map(|e| e.id).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NewEntity;
    use crate::step::ExplorationPath;

    fn registry(entities: &[(&str, &[&str])]) -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        for (name, fields) in entities {
            registry.register(NewEntity {
                name: name.to_string(),
                address: format!("/{}/new", name),
                path: ExplorationPath::root(),
                relationship_field_names: fields.iter().map(|f| f.to_string()).collect(),
                depth: 1,
            });
        }
        registry
    }

    fn id_of(registry: &EntityRegistry, name: &str) -> EntityId {
        registry
            .entities()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .unwrap()
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Customer_ID"), "customerid");
        assert_eq!(normalize_name("sales order-line"), "salesorderline");
        assert_eq!(normalize_name("__"), "");
    }

    #[test]
    fn test_invoice_belongs_to_customer() {
        let mut registry = registry(&[("invoice", &["customer_id"]), ("customer", &[])]);
        let hierarchy = build_hierarchy(&mut registry);

        let invoice = registry.get(id_of(&registry, "invoice")).unwrap();
        let customer = registry.get(id_of(&registry, "customer")).unwrap();

        assert!(invoice.parents.contains(&customer.id));
        assert!(customer.children.contains(&invoice.id));
        assert!(customer.is_root);
        assert!(!invoice.is_root);
        assert_eq!(hierarchy.roots, vec![customer.id]);
        assert_eq!(hierarchy.edges[0].via, "customer_id");
    }

    #[test]
    fn test_match_works_in_both_directions() {
        // Field "order" is contained in entity name "sales_order".
        let mut registry = registry(&[("sales_order", &[]), ("shipment", &["Order"])]);
        build_hierarchy(&mut registry);

        let shipment = registry.get(id_of(&registry, "shipment")).unwrap();
        assert_eq!(shipment.parents.len(), 1);
    }

    #[test]
    fn test_first_match_wins_per_field() {
        let mut registry = registry(&[
            ("user", &[]),
            ("user_group", &[]),
            ("membership", &["user_group_id"]),
        ]);
        build_hierarchy(&mut registry);

        let membership = registry.get(id_of(&registry, "membership")).unwrap();
        assert_eq!(
            membership.parents.iter().copied().collect::<Vec<_>>(),
            vec![id_of(&registry, "user")]
        );
    }

    #[test]
    fn test_entity_never_parents_itself() {
        let mut registry = registry(&[("customer", &["customer_id"])]);
        build_hierarchy(&mut registry);

        let customer = &registry.entities()[0];
        assert!(customer.parents.is_empty());
        assert!(customer.is_root);
    }

    #[test]
    fn test_multiple_parents_form_a_graph() {
        let mut registry = registry(&[
            ("customer", &[]),
            ("product", &[]),
            ("order_line", &["customer_id", "product_id"]),
        ]);
        build_hierarchy(&mut registry);

        let line = registry.get(id_of(&registry, "order_line")).unwrap();
        assert_eq!(line.parents.len(), 2);
    }

    #[test]
    fn test_edges_are_symmetric() {
        let mut registry = registry(&[
            ("company", &[]),
            ("department", &["company_id"]),
            ("employee", &["department_id", "company_id"]),
            ("badge", &["employee"]),
        ]);
        build_hierarchy(&mut registry);

        for a in registry.entities() {
            for b in registry.entities() {
                assert_eq!(a.children.contains(&b.id), b.parents.contains(&a.id));
            }
        }
    }

    #[test]
    fn test_order_puts_parents_first() {
        let mut registry = registry(&[
            ("badge", &["employee_id"]),
            ("employee", &["department_id"]),
            ("department", &[]),
        ]);
        let hierarchy = build_hierarchy(&mut registry);

        let position = |name: &str| {
            let id = id_of(&registry, name);
            hierarchy.order.iter().position(|x| *x == id).unwrap()
        };
        assert!(position("department") < position("employee"));
        assert!(position("employee") < position("badge"));
    }

    #[test]
    fn test_cycle_falls_back_to_discovery_order() {
        let mut registry = registry(&[("alpha", &["beta_id"]), ("beta", &["alpha_id"])]);
        let hierarchy = build_hierarchy(&mut registry);

        assert_eq!(hierarchy.order, vec![EntityId(0), EntityId(1)]);
        assert!(hierarchy.roots.is_empty());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut registry = registry(&[("invoice", &["customer_id"]), ("customer", &[])]);
        let first = build_hierarchy(&mut registry);
        let second = build_hierarchy(&mut registry);

        assert_eq!(first, second);
        assert_eq!(registry.entities()[1].children.len(), 1);
    }
}
