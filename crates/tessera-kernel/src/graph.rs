//! The declaration graph: every capability of an assembly and its
//! super-declaration edges.
//!
//! The graph is validated and frozen on construction. Walk order is a
//! depth-first, left-to-right pre-order traversal starting at the capability
//! itself, each node visited once; it is computed here once per capability
//! and never re-derived per call.

use crate::declaration::{CapabilityDeclaration, CapabilityId, FragmentClass, MethodDeclaration};
use crate::error::ResolutionError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A method reachable from a capability, with the node that declares it.
#[derive(Debug, Clone, Copy)]
pub struct ReachableMethod<'a> {
    pub declared_on: &'a CapabilityId,
    pub method: &'a MethodDeclaration,
}

#[derive(Debug)]
pub struct DeclarationGraph {
    declarations: BTreeMap<CapabilityId, CapabilityDeclaration>,
    /// Capabilities in the order they were declared.
    order: Vec<CapabilityId>,
    walks: BTreeMap<CapabilityId, Vec<CapabilityId>>,
    closures: BTreeMap<CapabilityId, BTreeSet<CapabilityId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DeclarationGraph {
    /// Validate and freeze a set of declarations.
    ///
    /// Rejects duplicate capabilities, unknown super-declarations, cycles,
    /// methods whose name is reused with a different signature anywhere
    /// in a capability's closure, and fragment classes bound to more than
    /// one declaration.
    pub fn new(
        declarations: impl IntoIterator<Item = CapabilityDeclaration>,
    ) -> Result<Self, ResolutionError> {
        let mut by_id = BTreeMap::new();
        let mut order = Vec::new();
        for decl in declarations {
            let id = decl.id.clone();
            if by_id.insert(id.clone(), decl).is_some() {
                return Err(ResolutionError::DuplicateCapability(id));
            }
            order.push(id);
        }

        for id in &order {
            let decl = &by_id[id];
            for parent in &decl.supers {
                if !by_id.contains_key(parent) {
                    return Err(ResolutionError::UnknownCapability {
                        capability: parent.clone(),
                        referenced_by: Some(id.clone()),
                    });
                }
            }
            let mut seen = BTreeSet::new();
            for method in &decl.methods {
                if !seen.insert(method.name.as_str()) {
                    return Err(ResolutionError::DuplicateMethod {
                        capability: id.clone(),
                        method: method.signature(),
                    });
                }
            }
        }

        check_fragment_classes(&by_id, &order)?;

        let mut marks = BTreeMap::new();
        for id in &order {
            let mut path = Vec::new();
            detect_cycle(&by_id, id, &mut marks, &mut path)?;
        }

        let mut walks = BTreeMap::new();
        let mut closures = BTreeMap::new();
        for id in &order {
            let mut walk = Vec::new();
            let mut visited = BTreeSet::new();
            pre_order(&by_id, id, &mut visited, &mut walk);
            closures.insert(id.clone(), visited);
            walks.insert(id.clone(), walk);
        }

        let graph = Self {
            declarations: by_id,
            order,
            walks,
            closures,
        };
        for id in &graph.order {
            graph.check_signatures(id)?;
        }
        Ok(graph)
    }

    pub fn get(&self, id: &CapabilityId) -> Option<&CapabilityDeclaration> {
        self.declarations.get(id)
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.declarations.contains_key(id)
    }

    /// Capabilities in declaration order.
    pub fn capabilities(&self) -> impl Iterator<Item = &CapabilityId> {
        self.order.iter()
    }

    /// Depth-first, left-to-right pre-order walk rooted at `id`.
    pub fn walk(&self, id: &CapabilityId) -> Result<&[CapabilityId], ResolutionError> {
        self.walks
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| unknown(id))
    }

    /// Whether `capability` is `other` or inherits from it.
    pub fn extends(&self, capability: &CapabilityId, other: &CapabilityId) -> bool {
        self.closures
            .get(capability)
            .is_some_and(|closure| closure.contains(other))
    }

    pub fn closure(&self, id: &CapabilityId) -> Result<&BTreeSet<CapabilityId>, ResolutionError> {
        self.closures.get(id).ok_or_else(|| unknown(id))
    }

    /// Every method reachable from `id`, in walk order. A signature inherited
    /// through several paths is listed once, at its first position.
    pub fn methods(&self, id: &CapabilityId) -> Result<Vec<ReachableMethod<'_>>, ResolutionError> {
        let mut seen = BTreeSet::new();
        let mut methods = Vec::new();
        for node in self.walk(id)? {
            let decl = &self.declarations[node];
            for method in &decl.methods {
                if seen.insert(method.signature()) {
                    methods.push(ReachableMethod {
                        declared_on: &decl.id,
                        method,
                    });
                }
            }
        }
        Ok(methods)
    }

    fn check_signatures(&self, id: &CapabilityId) -> Result<(), ResolutionError> {
        let mut by_name = BTreeMap::new();
        for reachable in self.methods(id)? {
            let signature = reachable.method.signature();
            match by_name.insert(reachable.method.name.as_str(), signature.clone()) {
                Some(existing) if existing != signature => {
                    return Err(ResolutionError::DuplicateMethod {
                        capability: id.clone(),
                        method: signature,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn unknown(id: &CapabilityId) -> ResolutionError {
    ResolutionError::UnknownCapability {
        capability: id.clone(),
        referenced_by: None,
    }
}

fn detect_cycle(
    declarations: &BTreeMap<CapabilityId, CapabilityDeclaration>,
    id: &CapabilityId,
    marks: &mut BTreeMap<CapabilityId, Mark>,
    path: &mut Vec<CapabilityId>,
) -> Result<(), ResolutionError> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|p| p == id).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(id.clone());
            return Err(ResolutionError::Cycle { path: cycle });
        }
        None => {}
    }
    marks.insert(id.clone(), Mark::Visiting);
    path.push(id.clone());
    for parent in &declarations[id].supers {
        detect_cycle(declarations, parent, marks, path)?;
    }
    path.pop();
    marks.insert(id.clone(), Mark::Done);
    Ok(())
}

/// Class names key the compiled fragment table, so within one role a class
/// may be attached in many places but only as the same declaration.
fn check_fragment_classes(
    declarations: &BTreeMap<CapabilityId, CapabilityDeclaration>,
    order: &[CapabilityId],
) -> Result<(), ResolutionError> {
    let mut mixins = ClassRegistry::default();
    let mut wrappers = ClassRegistry::default();
    let mut post_calls = ClassRegistry::default();
    for id in order {
        let decl = &declarations[id];
        for fragment in &decl.fragments {
            mixins.claim(&fragment.class, fragment, id)?;
        }
        let method_wrappers = decl.methods.iter().flat_map(|m| &m.wrappers);
        for wrapper in decl.wrappers.iter().chain(method_wrappers) {
            wrappers.claim(&wrapper.class, wrapper, id)?;
        }
        let method_post_calls = decl.methods.iter().flat_map(|m| &m.post_calls);
        for post_call in decl.post_calls.iter().chain(method_post_calls) {
            post_calls.claim(&post_call.class, post_call, id)?;
        }
    }
    Ok(())
}

struct ClassRegistry<'a, T> {
    seen: BTreeMap<&'a FragmentClass, &'a Arc<T>>,
}

impl<T> Default for ClassRegistry<'_, T> {
    fn default() -> Self {
        Self {
            seen: BTreeMap::new(),
        }
    }
}

impl<'a, T> ClassRegistry<'a, T> {
    fn claim(
        &mut self,
        class: &'a FragmentClass,
        declaration: &'a Arc<T>,
        on: &CapabilityId,
    ) -> Result<(), ResolutionError> {
        match self.seen.get(class) {
            Some(first) if !Arc::ptr_eq(first, declaration) => {
                Err(ResolutionError::DuplicateFragment {
                    class: class.clone(),
                    capability: on.clone(),
                })
            }
            Some(_) => Ok(()),
            None => {
                self.seen.insert(class, declaration);
                Ok(())
            }
        }
    }
}

fn pre_order(
    declarations: &BTreeMap<CapabilityId, CapabilityDeclaration>,
    id: &CapabilityId,
    visited: &mut BTreeSet<CapabilityId>,
    walk: &mut Vec<CapabilityId>,
) {
    if !visited.insert(id.clone()) {
        return;
    }
    walk.push(id.clone());
    for parent in &declarations[id].supers {
        pre_order(declarations, parent, visited, walk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{
        FragmentDeclaration, MethodDeclaration, Mixin, ParameterDeclaration, ValueKind, Wrapper,
        WrapperDeclaration,
    };
    use crate::error::FragmentError;
    use crate::invocation::{Call, Next};
    use serde_json::Value;

    struct Noop;

    impl Mixin for Noop {
        fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
            Ok(Value::Null)
        }
    }

    impl Wrapper for Noop {
        fn around(&self, call: &Call<'_>, next: &Next<'_>) -> Result<Value, FragmentError> {
            next.proceed(call.args)
        }
    }

    fn cap(id: &str) -> CapabilityDeclaration {
        CapabilityDeclaration::new(id)
    }

    fn ids(walk: &[CapabilityId]) -> Vec<&str> {
        walk.iter().map(CapabilityId::as_str).collect()
    }

    #[test]
    fn diamond_walk_visits_shared_parent_once() {
        let graph = DeclarationGraph::new([
            cap("Base"),
            cap("Left").extends("Base"),
            cap("Right").extends("Base"),
            cap("Both").extends("Left").extends("Right"),
        ])
        .unwrap();
        let walk = graph.walk(&"Both".into()).unwrap();
        assert_eq!(ids(walk), vec!["Both", "Left", "Base", "Right"]);
        assert!(graph.extends(&"Both".into(), &"Base".into()));
        assert!(!graph.extends(&"Left".into(), &"Right".into()));
    }

    #[test]
    fn unknown_super_is_rejected() {
        let err = DeclarationGraph::new([cap("Greeter").extends("Missing")]).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownCapability {
                capability: "Missing".into(),
                referenced_by: Some("Greeter".into()),
            }
        );
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let err = DeclarationGraph::new([cap("A").extends("B"), cap("B").extends("A")]).unwrap_err();
        assert_eq!(err.to_string(), "cyclic capability hierarchy: A -> B -> A");
    }

    #[test]
    fn duplicate_capabilities_are_rejected() {
        let err = DeclarationGraph::new([cap("A"), cap("A")]).unwrap_err();
        assert_eq!(err, ResolutionError::DuplicateCapability("A".into()));
    }

    #[test]
    fn conflicting_inherited_signatures_are_rejected() {
        let err = DeclarationGraph::new([
            cap("Named").method(
                MethodDeclaration::new("name").param(ParameterDeclaration::new("x", ValueKind::String)),
            ),
            cap("Person")
                .extends("Named")
                .method(MethodDeclaration::new("name")),
        ])
        .unwrap_err();
        assert!(matches!(err, ResolutionError::DuplicateMethod { .. }));
    }

    #[test]
    fn shared_signatures_are_listed_once_at_first_position() {
        let graph = DeclarationGraph::new([
            cap("Base").method(MethodDeclaration::new("id")),
            cap("Left").extends("Base").method(MethodDeclaration::new("left")),
            cap("Right").extends("Base").method(MethodDeclaration::new("id")),
            cap("Both").extends("Left").extends("Right"),
        ])
        .unwrap();
        let methods = graph.methods(&"Both".into()).unwrap();
        let listed: Vec<(&str, &str)> = methods
            .iter()
            .map(|m| (m.declared_on.as_str(), m.method.name.as_str()))
            .collect();
        assert_eq!(listed, vec![("Left", "left"), ("Base", "id")]);
    }

    #[test]
    fn one_class_cannot_name_two_declarations() {
        let err = DeclarationGraph::new([
            cap("Left").fragment(FragmentDeclaration::new("Impl", |_| Ok(Noop))),
            cap("Right").fragment(FragmentDeclaration::new("Impl", |_| Ok(Noop))),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::DuplicateFragment {
                class: "Impl".into(),
                capability: "Right".into(),
            }
        );
        assert_eq!(err.failure_class(), "duplicate_fragment");
    }

    #[test]
    fn a_shared_declaration_may_be_attached_twice() {
        let audit = Arc::new(WrapperDeclaration::new("Audit", |_| Ok(Noop)));
        let graph = DeclarationGraph::new([
            cap("Base").wrapper(audit.clone()),
            cap("Thing")
                .extends("Base")
                .method(MethodDeclaration::new("run").wrapper(audit.clone()))
                .wrapper(audit),
        ]);
        assert!(graph.is_ok());

        let err = DeclarationGraph::new([cap("Thing")
            .method(MethodDeclaration::new("run").wrapper(WrapperDeclaration::new("Audit", |_| Ok(Noop))))
            .wrapper(WrapperDeclaration::new("Audit", |_| Ok(Noop)))])
        .unwrap_err();
        assert!(matches!(err, ResolutionError::DuplicateFragment { .. }));
    }
}
