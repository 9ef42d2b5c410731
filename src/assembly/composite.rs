//! Resolution results for conditional child lookup.
//!
//! Looking up a child under an active build condition can leave more than one sibling
//! standing. [`Resolved`] captures that outcome as a tagged view: the common single case,
//! or a composite over the ambiguous set. The composite forwards field reads to its
//! members and answers only when they all agree; a disagreement is a broken build state
//! and surfaces as a [`crate::Error::Structure`]. Tree navigation through a composite
//! distributes across the members, deduplicates the results, and wraps again if the
//! answer is still ambiguous.
//!
//! A `Resolved` view owns nothing and caches nothing; it is valid for the tree and
//! context that produced it.

use crate::assembly::component::{ComponentFormat, ComponentId, ComponentTree};
use crate::assembly::constant::{Access, ConstantRef};
use crate::assembly::context::LinkerContext;
use crate::assembly::pool::ConstantPool;
use crate::{Error, Result};

/// The outcome of resolving a child or parent under the active build condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Exactly one component matched.
    Single(ComponentId),
    /// Several sibling components matched simultaneously.
    Composite(Vec<ComponentId>),
}

impl Resolved {
    /// The components represented by this view, eldest first.
    #[must_use]
    pub fn components(&self) -> &[ComponentId] {
        match self {
            Resolved::Single(id) => std::slice::from_ref(id),
            Resolved::Composite(ids) => ids,
        }
    }

    /// The single component, if the resolution was unambiguous.
    #[must_use]
    pub fn single(&self) -> Option<ComponentId> {
        match self {
            Resolved::Single(id) => Some(*id),
            Resolved::Composite(_) => None,
        }
    }

    /// True iff more than one sibling matched.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Resolved::Composite(_))
    }

    /// The format shared by every represented component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn format(&self, tree: &ComponentTree) -> Result<ComponentFormat> {
        self.agreed(|id| tree.format(id), "format")
    }

    /// The accessibility shared by every represented component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn access(&self, tree: &ComponentTree) -> Result<Access> {
        self.agreed(|id| tree.access(id), "access")
    }

    /// The abstractness shared by every represented component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn is_abstract(&self, tree: &ComponentTree) -> Result<bool> {
        self.agreed(|id| tree.is_abstract(id), "abstract")
    }

    /// The staticness shared by every represented component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn is_static(&self, tree: &ComponentTree) -> Result<bool> {
        self.agreed(|id| tree.is_static(id), "static")
    }

    /// The syntheticness shared by every represented component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn is_synthetic(&self, tree: &ComponentTree) -> Result<bool> {
        self.agreed(|id| tree.is_synthetic(id), "synthetic")
    }

    /// The identity constant shared by every represented component.
    ///
    /// Siblings of the same name may carry identities of different formats (a class in
    /// one version, a package in another), in which case the question has no answer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn identity(&self, tree: &ComponentTree) -> Result<ConstantRef> {
        self.agreed(
            |id| {
                tree.identity(id)?
                    .ok_or_else(|| Error::Structure("component has no identity".to_string()))
            },
            "identity",
        )
    }

    /// The name shared by every represented component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the members disagree.
    pub fn name<'a>(&self, tree: &ComponentTree, pool: &'a ConstantPool) -> Result<&'a str> {
        self.agreed(|id| tree.name(pool, id), "name")
    }

    /// Specify the accessibility of every represented component.
    ///
    /// # Errors
    /// Propagates setter failures.
    pub fn set_access(&self, tree: &mut ComponentTree, access: Access) -> Result<()> {
        for &id in self.components() {
            tree.set_access(id, access)?;
        }
        Ok(())
    }

    /// Specify the abstractness of every represented component.
    ///
    /// # Errors
    /// Propagates setter failures.
    pub fn set_abstract(&self, tree: &mut ComponentTree, is_abstract: bool) -> Result<()> {
        for &id in self.components() {
            tree.set_abstract(id, is_abstract)?;
        }
        Ok(())
    }

    /// Specify the staticness of every represented component.
    ///
    /// # Errors
    /// Propagates setter failures.
    pub fn set_static(&self, tree: &mut ComponentTree, is_static: bool) -> Result<()> {
        for &id in self.components() {
            tree.set_static(id, is_static)?;
        }
        Ok(())
    }

    /// Specify the syntheticness of every represented component.
    ///
    /// # Errors
    /// Propagates setter failures.
    pub fn set_synthetic(&self, tree: &mut ComponentTree, is_synthetic: bool) -> Result<()> {
        for &id in self.components() {
            tree.set_synthetic(id, is_synthetic)?;
        }
        Ok(())
    }

    /// Resolve a child by name through every represented component.
    ///
    /// The per-member results are merged and deduplicated; an answer that is still
    /// ambiguous is wrapped in a fresh composite.
    ///
    /// # Errors
    /// Propagates lookup failures.
    pub fn child_by_name(
        &self,
        tree: &mut ComponentTree,
        pool: &ConstantPool,
        name: &str,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Option<Resolved>> {
        self.distribute(|tree, member| tree.child_by_name(pool, member, name, context), tree)
    }

    /// Resolve a child by identity through every represented component.
    ///
    /// # Errors
    /// Propagates lookup failures.
    pub fn child_by_identity(
        &self,
        tree: &mut ComponentTree,
        pool: &ConstantPool,
        identity: ConstantRef,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Option<Resolved>> {
        self.distribute(
            |tree, member| tree.child_by_identity(pool, member, identity, context),
            tree,
        )
    }

    fn distribute<F>(&self, mut lookup: F, tree: &mut ComponentTree) -> Result<Option<Resolved>>
    where
        F: FnMut(&mut ComponentTree, ComponentId) -> Result<Option<Resolved>>,
    {
        let mut merged: Vec<ComponentId> = Vec::new();
        for &member in self.components() {
            if let Some(resolved) = lookup(tree, member)? {
                for &child in resolved.components() {
                    if !merged.contains(&child) {
                        merged.push(child);
                    }
                }
            }
        }

        Ok(match merged.len() {
            0 => None,
            1 => Some(Resolved::Single(merged[0])),
            _ => Some(Resolved::Composite(merged)),
        })
    }

    fn agreed<T, F>(&self, mut read: F, what: &str) -> Result<T>
    where
        T: PartialEq,
        F: FnMut(ComponentId) -> Result<T>,
    {
        let mut shared: Option<T> = None;
        for &member in self.components() {
            let value = read(member)?;
            match &shared {
                None => shared = Some(value),
                Some(existing) if *existing == value => {}
                Some(_) => {
                    return Err(Error::Structure(format!(
                        "can't ask {what} of an ambiguous component whose variants disagree"
                    )));
                }
            }
        }
        shared.ok_or_else(|| Error::Structure("empty composite".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::component::ComponentFormat;
    use crate::assembly::constant::Access;
    use crate::assembly::pool::ConstantPool;

    fn conditional_pair() -> (ComponentTree, ConstantPool, ComponentId, ComponentId, ComponentId) {
        let mut tree = ComponentTree::new();
        let mut pool = ConstantPool::new();
        let file = tree.new_file();
        let module = tree.new_module(&mut pool, file, "app").unwrap();

        let a = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "util")
            .unwrap();
        let b = tree
            .create_class(&mut pool, module, Access::Private, ComponentFormat::Class, "util")
            .unwrap();
        let cond_a = pool.ensure_named_condition("a").unwrap();
        let cond_b = pool.ensure_named_condition("b").unwrap();
        tree.set_condition(a, Some(cond_a)).unwrap();
        tree.set_condition(b, Some(cond_b)).unwrap();
        (tree, pool, module, a, b)
    }

    #[test]
    fn agreement_and_disagreement() {
        let (mut tree, pool, module, a, b) = conditional_pair();
        let composite = tree
            .child_by_name(&pool, module, "util", None)
            .unwrap()
            .unwrap();
        assert!(composite.is_composite());
        assert_eq!(composite.components(), &[a, b]);
        assert_eq!(composite.single(), None);

        // all members agree on format and name
        assert_eq!(composite.format(&tree).unwrap(), ComponentFormat::Class);
        assert_eq!(composite.name(&tree, &pool).unwrap(), "util");

        // access differs, so the question has no answer
        assert!(matches!(
            composite.access(&tree),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn group_wide_setters() {
        let (mut tree, pool, module, a, b) = conditional_pair();
        let composite = tree
            .child_by_name(&pool, module, "util", None)
            .unwrap()
            .unwrap();

        composite.set_access(&mut tree, Access::Protected).unwrap();
        assert_eq!(tree.access(a).unwrap(), Access::Protected);
        assert_eq!(tree.access(b).unwrap(), Access::Protected);
        assert_eq!(composite.access(&tree).unwrap(), Access::Protected);
    }

    #[test]
    fn navigation_distributes_and_deduplicates() {
        let (mut tree, mut pool, module, a, _b) = conditional_pair();

        // a child added through one sibling lives in the shared group, so both members
        // of the composite see the same component and the result collapses to it
        let inner = tree
            .create_class(&mut pool, a, Access::Public, ComponentFormat::Class, "Inner")
            .unwrap();
        let composite = tree
            .child_by_name(&pool, module, "util", None)
            .unwrap()
            .unwrap();

        let found = composite
            .child_by_name(&mut tree, &pool, "Inner", None)
            .unwrap()
            .unwrap();
        assert_eq!(found, Resolved::Single(inner));
        assert!(composite
            .child_by_name(&mut tree, &pool, "Absent", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn single_passthrough() {
        let mut tree = ComponentTree::new();
        let mut pool = ConstantPool::new();
        let file = tree.new_file();
        let module = tree.new_module(&mut pool, file, "app").unwrap();
        let class = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "C")
            .unwrap();

        let resolved = tree
            .child_by_name(&pool, module, "C", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.single(), Some(class));
        assert_eq!(resolved.format(&tree).unwrap(), ComponentFormat::Class);
        assert_eq!(resolved.access(&tree).unwrap(), Access::Public);
    }
}
