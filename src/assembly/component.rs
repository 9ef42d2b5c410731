//! The structural component tree: modules, packages, classes, properties, and methods.
//!
//! A [`ComponentTree`] is an arena of component nodes addressed by [`ComponentId`]. Every
//! node carries a packed flags word (format, access, and modifier bits), an identity
//! constant, and an optional boolean condition. Where the format turns complicated is the
//! *sibling chain*: several components may occupy the same namespace slot under mutually
//! exclusive build conditions, in which case they are linked into a chain and share a
//! single group cell holding the child maps for the whole chain. A child added through one
//! sibling is immediately visible through every other.
//!
//! Children are stored in two maps, disjoint by kind: non-method children are keyed by
//! name, methods by their full signature constant (methods are overloadable, so a name is
//! not enough). A group may also hold its children as an undeserialized byte block; the
//! first access through any sibling deserializes the block for the whole group and
//! discards it.
//!
//! Child lookup filters the sibling chain against the active
//! [`LinkerContext`](crate::assembly::context::LinkerContext) and yields a
//! [`Resolved`] view: nothing, the one surviving sibling, or a composite over the
//! ambiguous set.

use std::collections::HashMap;

use bitflags::bitflags;
use strum::FromRepr;

use crate::assembly::composite::Resolved;
use crate::assembly::constant::{Access, ConstantFormat, ConstantRef};
use crate::assembly::context::LinkerContext;
use crate::assembly::pool::ConstantPool;
use crate::assembly::version::Version;
use crate::file::parser::Parser;
use crate::file::writer::Writer;
use crate::{Error, Result};

/// The leading byte of a child block that selects the conditional multi-sibling form.
///
/// Bit 15 of a flags word is never set, so the first byte of a plain body can never
/// collide with this marker.
pub const CONDITIONAL_MARKER: u8 = 0x80;

/// Mask of the format bits within a component flags word.
pub const FORMAT_MASK: u16 = 0x000F;
/// Mask of the access bits within a component flags word.
pub const ACCESS_MASK: u16 = 0x0300;
/// Shift of the access bits within a component flags word.
pub const ACCESS_SHIFT: u16 = 8;

bitflags! {
    /// The modifier bits of a component flags word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u16 {
        /// The component is abstract.
        const ABSTRACT = 0x0400;
        /// The component is static.
        const STATIC = 0x0800;
        /// The component was produced by the compiler rather than written by hand.
        const SYNTHETIC = 0x1000;
    }
}

/// The format of a component, stored in the low four bits of its flags word.
///
/// The numeric values are part of the serialized module format and must not be reordered.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentFormat {
    /// An interface declaration.
    Interface = 0,
    /// A class declaration.
    Class = 1,
    /// An immutable const-class declaration.
    Const = 2,
    /// An enumeration declaration.
    Enum = 3,
    /// A service-class declaration.
    Service = 4,
    /// A package declaration.
    Package = 5,
    /// A module declaration.
    Module = 6,
    /// A property declaration.
    Property = 7,
    /// The named group of method overloads.
    MultiMethod = 8,
    /// A single method, identified by its full signature.
    Method = 9,
    /// The file-level container; exists only as the tree root and is never serialized
    /// as a child.
    File = 10,
}

impl ComponentFormat {
    /// True iff this format is one of the class kinds.
    #[must_use]
    pub fn is_class_kind(&self) -> bool {
        matches!(
            self,
            ComponentFormat::Interface
                | ComponentFormat::Class
                | ComponentFormat::Const
                | ComponentFormat::Enum
                | ComponentFormat::Service
        )
    }

    /// True iff components of this format can contain packages.
    #[must_use]
    pub fn is_package_container(&self) -> bool {
        matches!(self, ComponentFormat::Module | ComponentFormat::Package)
    }

    /// True iff components of this format can contain classes and properties.
    #[must_use]
    pub fn is_class_container(&self) -> bool {
        self.is_class_kind()
            || matches!(
                self,
                ComponentFormat::Module | ComponentFormat::Package | ComponentFormat::Method
            )
    }

    /// True iff components of this format can contain methods (via multi-methods).
    #[must_use]
    pub fn is_method_container(&self) -> bool {
        self.is_class_kind()
            || matches!(
                self,
                ComponentFormat::Module
                    | ComponentFormat::Package
                    | ComponentFormat::Property
                    | ComponentFormat::Method
            )
    }
}

/// The index of a component node within its [`ComponentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupId(u32);

/// The children of one sibling group: either still raw bytes, or the two live maps.
///
/// The transition from `Unloaded` to `Loaded` happens once per group, the first time any
/// sibling's children are needed, and discards the bytes.
#[derive(Debug)]
enum ChildState {
    /// The serialized child block, not yet deserialized.
    Unloaded(Vec<u8>),
    /// Live child maps, shared by every sibling in the group.
    Loaded {
        by_name: HashMap<String, ComponentId>,
        methods: HashMap<ConstantRef, ComponentId>,
    },
}

impl ChildState {
    fn empty() -> Self {
        ChildState::Loaded {
            by_name: HashMap::new(),
            methods: HashMap::new(),
        }
    }
}

/// The shared cell owned by one sibling group.
#[derive(Debug)]
struct Group {
    children: ChildState,
}

/// Format-specific body fields beyond flags and identity.
#[derive(Debug)]
enum Body {
    Plain,
    /// A module carries the sorted set of version labels it contains.
    Module { versions: Vec<ConstantRef> },
    /// A property carries its type.
    Property { property_type: ConstantRef },
}

#[derive(Debug)]
struct Node {
    flags: u16,
    identity: Option<ConstantRef>,
    condition: Option<ConstantRef>,
    parent: Option<ComponentId>,
    sibling: Option<ComponentId>,
    group: GroupId,
    body: Body,
    documentation: Option<String>,
    modified: bool,
}

/// An arena of component nodes forming one structural declaration tree.
///
/// All operations address nodes by [`ComponentId`]. Operations that may need to observe
/// children take `&mut self` because they realize deferred child blocks on first access.
#[derive(Debug, Default)]
pub struct ComponentTree {
    nodes: Vec<Node>,
    groups: Vec<Group>,
}

impl ComponentTree {
    /// Construct an empty tree.
    #[must_use]
    pub fn new() -> Self {
        ComponentTree::default()
    }

    /// Create the file-level root. It has no identity, no parent, and is never
    /// serialized as a child of anything.
    pub(crate) fn new_file(&mut self) -> ComponentId {
        self.new_node(None, ComponentFormat::File as u16, None, None, Body::Plain)
    }

    pub(crate) fn new_module(
        &mut self,
        pool: &mut ConstantPool,
        file: ComponentId,
        name: &str,
    ) -> Result<ComponentId> {
        let identity = pool.ensure_module(name)?;
        let flags = compose_flags(ComponentFormat::Module, Access::Public, Modifiers::STATIC)?;
        let module = self.new_node(
            Some(file),
            flags,
            Some(identity),
            None,
            Body::Module {
                versions: Vec::new(),
            },
        );
        self.add_child(pool, file, module)?;
        Ok(module)
    }

    // ----- flags and identity --------------------------------------------------------------

    /// The format of the component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn format(&self, id: ComponentId) -> Result<ComponentFormat> {
        let flags = self.node(id)?.flags;
        ComponentFormat::from_repr((flags & FORMAT_MASK) as u8)
            .ok_or_else(|| Error::Structure(format!("invalid component format in flags {flags:#06x}")))
    }

    /// The accessibility of the component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the flags word carries no access encoding.
    pub fn access(&self, id: ComponentId) -> Result<Access> {
        let flags = self.node(id)?.flags;
        Access::from_repr(((flags & ACCESS_MASK) >> ACCESS_SHIFT) as u8)
            .ok_or_else(|| Error::Structure(format!("invalid component access in flags {flags:#06x}")))
    }

    /// Specify the accessibility of the component. A no-op if unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for [`Access::Struct`], which applies
    /// only to type descriptors.
    pub fn set_access(&mut self, id: ComponentId, access: Access) -> Result<()> {
        if access == Access::Struct {
            return Err(Error::InvalidArgument(
                "Struct access cannot be applied to a component".to_string(),
            ));
        }
        let old = self.node(id)?.flags;
        let new = (old & !ACCESS_MASK) | ((access as u16) << ACCESS_SHIFT);
        self.store_flags(id, old, new)
    }

    /// True iff the component is marked abstract.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn is_abstract(&self, id: ComponentId) -> Result<bool> {
        Ok(self.node(id)?.flags & Modifiers::ABSTRACT.bits() != 0)
    }

    /// Specify whether the component is abstract. A no-op if unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn set_abstract(&mut self, id: ComponentId, is_abstract: bool) -> Result<()> {
        self.store_modifier(id, Modifiers::ABSTRACT, is_abstract)
    }

    /// True iff the component is marked static.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn is_static(&self, id: ComponentId) -> Result<bool> {
        Ok(self.node(id)?.flags & Modifiers::STATIC.bits() != 0)
    }

    /// Specify whether the component is static. A no-op if unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn set_static(&mut self, id: ComponentId, is_static: bool) -> Result<()> {
        self.store_modifier(id, Modifiers::STATIC, is_static)
    }

    /// True iff the component is marked synthetic.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn is_synthetic(&self, id: ComponentId) -> Result<bool> {
        Ok(self.node(id)?.flags & Modifiers::SYNTHETIC.bits() != 0)
    }

    /// Specify whether the component is synthetic. A no-op if unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn set_synthetic(&mut self, id: ComponentId, is_synthetic: bool) -> Result<()> {
        self.store_modifier(id, Modifiers::SYNTHETIC, is_synthetic)
    }

    fn store_modifier(&mut self, id: ComponentId, modifier: Modifiers, on: bool) -> Result<()> {
        let old = self.node(id)?.flags;
        let new = if on {
            old | modifier.bits()
        } else {
            old & !modifier.bits()
        };
        self.store_flags(id, old, new)
    }

    fn store_flags(&mut self, id: ComponentId, old: u16, new: u16) -> Result<()> {
        if new != old {
            let node = self.node_mut(id)?;
            node.flags = new;
            node.modified = true;
        }
        Ok(())
    }

    /// The identity constant of the component, or `None` for the file root.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn identity(&self, id: ComponentId) -> Result<Option<ConstantRef>> {
        Ok(self.node(id)?.identity)
    }

    /// The condition gating the component's existence, if any.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn condition(&self, id: ComponentId) -> Result<Option<ConstantRef>> {
        Ok(self.node(id)?.condition)
    }

    /// Replace the condition on the component and mark it modified.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn set_condition(&mut self, id: ComponentId, condition: Option<ConstantRef>) -> Result<()> {
        let node = self.node_mut(id)?;
        node.condition = condition;
        node.modified = true;
        Ok(())
    }

    /// Require an additional condition: the component now exists only when both the old
    /// and the new condition hold.
    ///
    /// # Errors
    /// Propagates condition-construction failures.
    pub fn add_and_condition(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
        condition: ConstantRef,
    ) -> Result<()> {
        let combined = match self.node(id)?.condition {
            Some(existing) => pool.ensure_all_condition(&[existing, condition])?,
            None => condition,
        };
        self.set_condition(id, Some(combined))
    }

    /// Allow an alternative condition: the component now exists when either the old or
    /// the new condition holds.
    ///
    /// # Errors
    /// Propagates condition-construction failures.
    pub fn add_or_condition(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
        condition: ConstantRef,
    ) -> Result<()> {
        let combined = match self.node(id)?.condition {
            Some(existing) => pool.ensure_any_condition(&[existing, condition])?,
            None => condition,
        };
        self.set_condition(id, Some(combined))
    }

    /// The name of the component, resolved through its identity constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for the file root, which has no name.
    pub fn name<'a>(&self, pool: &'a ConstantPool, id: ComponentId) -> Result<&'a str> {
        let identity = self
            .node(id)?
            .identity
            .ok_or_else(|| Error::Structure("component has no identity".to_string()))?;
        pool.name_of(identity)
    }

    /// The documentation attached to the component, if any.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn documentation(&self, id: ComponentId) -> Result<Option<&str>> {
        Ok(self.node(id)?.documentation.as_deref())
    }

    /// Attach documentation to the component and mark it modified.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn set_documentation(
        &mut self,
        id: ComponentId,
        documentation: Option<String>,
    ) -> Result<()> {
        let node = self.node_mut(id)?;
        node.documentation = documentation;
        node.modified = true;
        Ok(())
    }

    /// True iff this component, or any younger sibling in its chain, has been modified.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn is_modified(&self, id: ComponentId) -> Result<bool> {
        let mut current = Some(id);
        while let Some(sibling) = current {
            let node = self.node(sibling)?;
            if node.modified {
                return Ok(true);
            }
            current = node.sibling;
        }
        Ok(false)
    }

    /// Clear the modification flag on this component and every younger sibling.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn reset_modified(&mut self, id: ComponentId) -> Result<()> {
        let mut current = Some(id);
        while let Some(sibling) = current {
            let node = self.node_mut(sibling)?;
            node.modified = false;
            current = node.sibling;
        }
        Ok(())
    }

    /// The next younger sibling occupying the same namespace slot, if any.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] for an invalid id.
    pub fn next_sibling(&self, id: ComponentId) -> Result<Option<ComponentId>> {
        Ok(self.node(id)?.sibling)
    }

    // ----- module and property bodies ------------------------------------------------------

    /// The version labels contained in a module, in ascending order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the component is not a module.
    pub fn module_versions(&self, pool: &ConstantPool, id: ComponentId) -> Result<Vec<Version>> {
        let mut versions = Vec::new();
        for &constant in self.module_body(id)? {
            versions.push(pool.version_value(constant)?.clone());
        }
        Ok(versions)
    }

    /// True iff the module carries at least one version label.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the component is not a module.
    pub fn is_versioned(&self, id: ComponentId) -> Result<bool> {
        Ok(!self.module_body(id)?.is_empty())
    }

    /// Label the module contents with the given version, replacing a single existing
    /// label if there is one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the module already carries more than one
    /// version label.
    pub fn label_version(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
        version: &Version,
    ) -> Result<()> {
        if self.module_body(id)?.len() > 1 {
            return Err(Error::Structure(format!(
                "the module ({}) contains more than one version label",
                self.name(pool, id)?
            )));
        }

        let constant = pool.ensure_version(version)?;
        let versions = self.module_body_mut(id)?;
        versions.clear();
        versions.push(constant);
        self.node_mut(id)?.modified = true;
        Ok(())
    }

    /// Add a version label to the module. A no-op if the label already exists.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the component is not a module.
    pub fn add_version(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
        version: &Version,
    ) -> Result<()> {
        let constant = pool.ensure_version(version)?;
        if self.module_body(id)?.contains(&constant) {
            return Ok(());
        }

        let versions = self.module_body_mut(id)?;
        versions.push(constant);
        sort_versions(versions, pool);
        self.node_mut(id)?.modified = true;
        Ok(())
    }

    /// Remove a version label from the module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the label does not exist.
    pub fn purge_version(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
        version: &Version,
    ) -> Result<()> {
        let constant = pool.ensure_version(version)?;
        let versions = self.module_body_mut(id)?;
        let Some(index) = versions.iter().position(|&v| v == constant) else {
            return Err(Error::InvalidArgument(format!(
                "version ({version}) does not exist in this module"
            )));
        };
        versions.remove(index);
        self.node_mut(id)?.modified = true;
        Ok(())
    }

    /// Remove every version label from the module except the given one.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the label does not exist.
    pub fn purge_all_except_version(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
        version: &Version,
    ) -> Result<()> {
        let constant = pool.ensure_version(version)?;
        let versions = self.module_body_mut(id)?;
        if !versions.contains(&constant) {
            return Err(Error::InvalidArgument(format!(
                "version ({version}) does not exist in this module"
            )));
        }
        versions.clear();
        versions.push(constant);
        self.node_mut(id)?.modified = true;
        Ok(())
    }

    /// True iff the module supports the given version, either exactly or through a
    /// substitutable newer label.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the component is not a module.
    pub fn supports_version(
        &self,
        pool: &ConstantPool,
        id: ComponentId,
        version: &Version,
        exact: bool,
    ) -> Result<bool> {
        for &constant in self.module_body(id)? {
            let labeled = pool.version_value(constant)?;
            if labeled == version || (!exact && labeled.is_substitutable_for(version)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The type constant of a property component.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the component is not a property.
    pub fn property_type(&self, id: ComponentId) -> Result<ConstantRef> {
        match &self.node(id)?.body {
            Body::Property { property_type } => Ok(*property_type),
            _ => Err(Error::Structure("component is not a property".to_string())),
        }
    }

    /// Replace the type of a property component and mark it modified.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant is not a type.
    pub fn set_property_type(
        &mut self,
        pool: &ConstantPool,
        id: ComponentId,
        property_type: ConstantRef,
    ) -> Result<()> {
        if pool.format_of(property_type)? != ConstantFormat::ClassType {
            return Err(Error::InvalidArgument(format!(
                "constant {:?} is not a type",
                pool.format_of(property_type)?
            )));
        }
        match &mut self.node_mut(id)?.body {
            Body::Property {
                property_type: slot,
            } => {
                *slot = property_type;
            }
            _ => return Err(Error::Structure("component is not a property".to_string())),
        }
        self.node_mut(id)?.modified = true;
        Ok(())
    }

    // ----- creation ------------------------------------------------------------------------

    /// Create and adopt a package with the given name.
    ///
    /// Duplicate names are not rejected here: several components may legally occupy the
    /// same namespace slot until conditional consistency is checked later in linking.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if this component cannot contain a package.
    pub fn create_package(
        &mut self,
        pool: &mut ConstantPool,
        parent: ComponentId,
        access: Access,
        name: &str,
    ) -> Result<ComponentId> {
        let container = self.format(parent)?;
        if !container.is_package_container() {
            return Err(Error::Structure(format!(
                "this component ({container:?}) cannot contain a package"
            )));
        }

        let identity = pool.ensure_package(self.require_identity(parent)?, name)?;
        let flags = compose_flags(ComponentFormat::Package, access, Modifiers::empty())?;
        let child = self.new_node(Some(parent), flags, Some(identity), None, Body::Plain);
        self.add_child(pool, parent, child)?;
        Ok(child)
    }

    /// Create and adopt a class-kind component with the given name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `format` is not a class kind, or
    /// [`crate::Error::Structure`] if this component cannot contain a class.
    pub fn create_class(
        &mut self,
        pool: &mut ConstantPool,
        parent: ComponentId,
        access: Access,
        format: ComponentFormat,
        name: &str,
    ) -> Result<ComponentId> {
        if !format.is_class_kind() {
            return Err(Error::InvalidArgument(format!(
                "format {format:?} is not a class format"
            )));
        }
        let container = self.format(parent)?;
        if !container.is_class_container() {
            return Err(Error::Structure(format!(
                "this component ({container:?}) cannot contain a class"
            )));
        }

        let identity = pool.ensure_class(self.require_identity(parent)?, name)?;
        let flags = compose_flags(format, access, Modifiers::empty())?;
        let child = self.new_node(Some(parent), flags, Some(identity), None, Body::Plain);
        self.add_child(pool, parent, child)?;
        Ok(child)
    }

    /// Create and adopt a property with the given type and name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if this component cannot contain a property,
    /// or [`crate::Error::InvalidArgument`] if the type constant is not a type.
    pub fn create_property(
        &mut self,
        pool: &mut ConstantPool,
        parent: ComponentId,
        is_static: bool,
        access: Access,
        property_type: ConstantRef,
        name: &str,
    ) -> Result<ComponentId> {
        let container = self.format(parent)?;
        if !container.is_class_container() {
            return Err(Error::Structure(format!(
                "this component ({container:?}) cannot contain a property"
            )));
        }
        if pool.format_of(property_type)? != ConstantFormat::ClassType {
            return Err(Error::InvalidArgument(format!(
                "constant {:?} is not a type",
                pool.format_of(property_type)?
            )));
        }

        let identity = pool.ensure_property(self.require_identity(parent)?, name)?;
        let modifiers = if is_static {
            Modifiers::STATIC
        } else {
            Modifiers::empty()
        };
        let flags = compose_flags(ComponentFormat::Property, access, modifiers)?;
        let child = self.new_node(
            Some(parent),
            flags,
            Some(identity),
            None,
            Body::Property { property_type },
        );
        self.add_child(pool, parent, child)?;
        Ok(child)
    }

    /// Find the multi-method holding overloads of the given name, creating it if it does
    /// not exist yet.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if this component cannot contain a method.
    pub fn ensure_multi_method(
        &mut self,
        pool: &mut ConstantPool,
        parent: ComponentId,
        name: &str,
    ) -> Result<ComponentId> {
        let container = self.format(parent)?;
        if !container.is_method_container() {
            return Err(Error::Structure(format!(
                "this component ({container:?}) cannot contain a method"
            )));
        }

        self.realize(pool, parent)?;
        if let Some(eldest) = self.named_child(parent, name)? {
            let mut current = Some(eldest);
            while let Some(sibling) = current {
                if self.format(sibling)? == ComponentFormat::MultiMethod {
                    return Ok(sibling);
                }
                current = self.node(sibling)?.sibling;
            }
        }

        let identity = pool.ensure_multi_method(self.require_identity(parent)?, name)?;
        let flags = ComponentFormat::MultiMethod as u16;
        let child = self.new_node(Some(parent), flags, Some(identity), None, Body::Plain);
        self.add_child(pool, parent, child)?;
        Ok(child)
    }

    /// Create and adopt a method with the given signature, keyed under the multi-method
    /// for its name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if this component cannot contain a method, or
    /// [`crate::Error::InvalidArgument`] for an invalid signature.
    pub fn create_method(
        &mut self,
        pool: &mut ConstantPool,
        parent: ComponentId,
        access: Access,
        name: &str,
        params: &[ConstantRef],
        returns: &[ConstantRef],
    ) -> Result<ComponentId> {
        let multi_method = self.ensure_multi_method(pool, parent, name)?;
        let identity = pool.ensure_method(
            self.require_identity(parent)?,
            name,
            access,
            params,
            returns,
        )?;
        let flags = compose_flags(ComponentFormat::Method, access, Modifiers::empty())?;
        let child = self.new_node(Some(multi_method), flags, Some(identity), None, Body::Plain);
        self.add_child(pool, multi_method, child)?;
        Ok(child)
    }

    /// Adopt a child into this component's namespace.
    ///
    /// A first child for its key is inserted directly. A child whose key is already
    /// occupied is appended to the end of that key's sibling chain, re-parented here, and
    /// joined to the chain's shared group; such a child must not bring children of its
    /// own, since merging populated subtrees is unsupported.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the child has no identity or already owns
    /// children while joining an existing chain.
    pub fn add_child(
        &mut self,
        pool: &ConstantPool,
        parent: ComponentId,
        child: ComponentId,
    ) -> Result<()> {
        self.realize(pool, parent)?;

        let identity = self.require_identity(child)?;
        let existing = if self.format(child)? == ComponentFormat::Method {
            let group = self.group_of(parent)?;
            let ChildState::Loaded { methods, .. } = &group.children else {
                return Err(Error::Structure("children not realized".to_string()));
            };
            methods.get(&identity).copied()
        } else {
            self.named_child(parent, pool.name_of(identity)?)?
        };

        match existing {
            None => {
                let key_name = if self.format(child)? == ComponentFormat::Method {
                    None
                } else {
                    Some(pool.name_of(identity)?.to_string())
                };
                self.node_mut(child)?.parent = Some(parent);
                let group = self.group_mut(parent)?;
                let ChildState::Loaded { by_name, methods } = &mut group.children else {
                    return Err(Error::Structure("children not realized".to_string()));
                };
                match key_name {
                    Some(name) => {
                        by_name.insert(name, child);
                    }
                    None => {
                        methods.insert(identity, child);
                    }
                }
            }
            Some(eldest) => {
                self.join_sibling_chain(parent, eldest, child)?;
            }
        }

        self.node_mut(parent)?.modified = true;
        Ok(())
    }

    fn join_sibling_chain(
        &mut self,
        parent: ComponentId,
        eldest: ComponentId,
        child: ComponentId,
    ) -> Result<()> {
        match &self.group_of(child)?.children {
            ChildState::Unloaded(_) => {
                return Err(Error::Structure(
                    "cannot merge a sibling that already owns children".to_string(),
                ));
            }
            ChildState::Loaded { by_name, methods } => {
                if !by_name.is_empty() || !methods.is_empty() {
                    return Err(Error::Structure(
                        "cannot merge a sibling that already owns children".to_string(),
                    ));
                }
            }
        }

        let mut last = eldest;
        while let Some(next) = self.node(last)?.sibling {
            last = next;
        }

        let shared_group = self.node(eldest)?.group;
        self.node_mut(last)?.sibling = Some(child);
        let child_node = self.node_mut(child)?;
        child_node.parent = Some(parent);
        child_node.group = shared_group;
        Ok(())
    }

    // ----- child resolution ----------------------------------------------------------------

    /// Resolve the child occupying the given name slot under the active context.
    ///
    /// There are five cases: no child by that name; one unconditional child; several
    /// children of which none, one, or more than one survive condition filtering. The
    /// result is `None`, the single survivor, or a composite over the survivors. A `None`
    /// context disables filtering and selects every sibling.
    ///
    /// # Errors
    /// Propagates condition-evaluation and deferred-load failures.
    pub fn child_by_name(
        &mut self,
        pool: &ConstantPool,
        parent: ComponentId,
        name: &str,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Option<Resolved>> {
        self.realize(pool, parent)?;
        let Some(eldest) = self.named_child(parent, name)? else {
            return Ok(None);
        };

        let node = self.node(eldest)?;
        if node.sibling.is_none() && node.condition.is_none() {
            return Ok(Some(Resolved::Single(eldest)));
        }
        self.select_matching_siblings(pool, eldest, context)
    }

    /// Resolve the child with the given identity under the active context.
    ///
    /// Methods are looked up by their signature constant; everything else resolves
    /// through the name carried by the identity.
    ///
    /// # Errors
    /// Propagates condition-evaluation and deferred-load failures.
    pub fn child_by_identity(
        &mut self,
        pool: &ConstantPool,
        parent: ComponentId,
        identity: ConstantRef,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Option<Resolved>> {
        self.realize(pool, parent)?;

        let eldest = if pool.format_of(identity)? == ConstantFormat::Method {
            let group = self.group_of(parent)?;
            let ChildState::Loaded { methods, .. } = &group.children else {
                return Err(Error::Structure("children not realized".to_string()));
            };
            methods.get(&identity).copied()
        } else {
            self.named_child(parent, pool.name_of(identity)?)?
        };
        let Some(eldest) = eldest else {
            return Ok(None);
        };

        let node = self.node(eldest)?;
        if node.sibling.is_none() && node.identity == Some(identity) && node.condition.is_none() {
            return Ok(Some(Resolved::Single(eldest)));
        }
        self.select_matching_siblings(pool, eldest, context)
    }

    fn select_matching_siblings(
        &self,
        pool: &ConstantPool,
        eldest: ComponentId,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Option<Resolved>> {
        let mut matches = Vec::new();
        let mut current = Some(eldest);
        while let Some(sibling) = current {
            let node = self.node(sibling)?;
            let selected = match (context, node.condition) {
                (None, _) | (Some(_), None) => true,
                (Some(context), Some(condition)) => pool.evaluate_condition(condition, context)?,
            };
            if selected {
                matches.push(sibling);
            }
            current = node.sibling;
        }

        Ok(match matches.len() {
            0 => None,
            1 => Some(Resolved::Single(matches[0])),
            _ => Some(Resolved::Composite(matches)),
        })
    }

    /// Materialize every child visible under the active context, by running each key of
    /// both child maps through the same condition-filtering resolution as a direct
    /// lookup. Name keys are visited in sorted order, then method keys.
    ///
    /// # Errors
    /// Propagates condition-evaluation and deferred-load failures.
    pub fn children(
        &mut self,
        pool: &ConstantPool,
        parent: ComponentId,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Vec<Resolved>> {
        self.realize(pool, parent)?;
        let (names, method_keys) = self.child_keys(parent)?;

        let mut resolved = Vec::new();
        for name in names {
            if let Some(child) = self.child_by_name(pool, parent, &name, context)? {
                resolved.push(child);
            }
        }
        for key in method_keys {
            if let Some(child) = self.child_by_identity(pool, parent, key, context)? {
                resolved.push(child);
            }
        }
        Ok(resolved)
    }

    /// Resolve the parent of a component under the active context.
    ///
    /// When the physical parent is unconditional it is the only possible parent. When it
    /// carries a condition, the correct variant must be re-derived by asking the
    /// grandparent for a child matching the parent's identity; the answer depends on the
    /// context and is never cached.
    ///
    /// # Errors
    /// Propagates condition-evaluation and deferred-load failures.
    pub fn resolve_parent(
        &mut self,
        pool: &ConstantPool,
        id: ComponentId,
        context: Option<&dyn LinkerContext>,
    ) -> Result<Option<Resolved>> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(None);
        };
        if self.node(parent)?.condition.is_none() {
            return Ok(Some(Resolved::Single(parent)));
        }

        let grandparent = self.node(parent)?.parent.ok_or_else(|| {
            Error::Structure("conditional component cannot be the tree root".to_string())
        })?;
        let identity = self.require_identity(parent)?;
        if self.format(parent)? == ComponentFormat::Method {
            self.child_by_identity(pool, grandparent, identity, context)
        } else {
            let name = pool.name_of(identity)?.to_string();
            self.child_by_name(pool, grandparent, &name, context)
        }
    }

    /// Visit the children of this component: name-keyed children first, then methods.
    ///
    /// For each key the eldest sibling is visited, then optionally the rest of its chain,
    /// then optionally the eldest sibling's own children, recursively with the same
    /// flags.
    ///
    /// # Errors
    /// Propagates deferred-load failures.
    pub fn visit_children<F>(
        &mut self,
        pool: &ConstantPool,
        id: ComponentId,
        include_siblings: bool,
        recursive: bool,
        visitor: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&ComponentTree, ComponentId),
    {
        let mut order = Vec::new();
        self.collect_visit(pool, id, include_siblings, recursive, &mut order)?;
        for component in order {
            visitor(self, component);
        }
        Ok(())
    }

    fn collect_visit(
        &mut self,
        pool: &ConstantPool,
        id: ComponentId,
        include_siblings: bool,
        recursive: bool,
        order: &mut Vec<ComponentId>,
    ) -> Result<()> {
        self.realize(pool, id)?;
        for eldest in self.eldest_children(pool, id)? {
            order.push(eldest);
            if include_siblings {
                let mut current = self.node(eldest)?.sibling;
                while let Some(sibling) = current {
                    order.push(sibling);
                    current = self.node(sibling)?.sibling;
                }
            }
            if recursive {
                self.collect_visit(pool, eldest, include_siblings, recursive, order)?;
            }
        }
        Ok(())
    }

    // ----- constant registration -----------------------------------------------------------

    /// Re-register the constants referenced by this component's body: its identity, its
    /// condition, and its format-specific fields.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn register_constants(&mut self, pool: &mut ConstantPool, id: ComponentId) -> Result<()> {
        let node = self.node(id)?;
        let identity = node.identity;
        let condition = node.condition;

        if let Some(identity) = identity {
            pool.register_ref(identity)?;
        }
        if let Some(condition) = condition {
            pool.register_ref(condition)?;
        }
        match &self.node(id)?.body {
            Body::Module { versions } => {
                for version in versions.clone() {
                    pool.register_ref(version)?;
                }
            }
            Body::Property { property_type } => {
                pool.register_ref(*property_type)?;
            }
            Body::Plain => {}
        }
        Ok(())
    }

    /// Re-register the constants of every child, sibling chains included, recursively.
    ///
    /// Deferred child blocks are realized along the way; the usage counts that drive pool
    /// optimization cannot be computed from raw bytes.
    ///
    /// # Errors
    /// Propagates registration and deferred-load failures.
    pub fn register_children_constants(
        &mut self,
        pool: &mut ConstantPool,
        id: ComponentId,
    ) -> Result<()> {
        self.realize(pool, id)?;
        for eldest in self.eldest_children(pool, id)? {
            let mut current = Some(eldest);
            while let Some(sibling) = current {
                self.register_constants(pool, sibling)?;
                current = self.node(sibling)?.sibling;
            }
            self.register_children_constants(pool, eldest)?;
        }
        Ok(())
    }

    // ----- (de)serialization ---------------------------------------------------------------

    /// Write the body of one component: the 2-byte flags word high byte first, the packed
    /// position of the identity constant, then format-specific fields.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if any referenced constant has no position.
    pub fn assemble_body(
        &self,
        pool: &ConstantPool,
        id: ComponentId,
        writer: &mut Writer,
    ) -> Result<()> {
        let node = self.node(id)?;
        writer.write_u16_be(node.flags);
        let identity = self.require_identity(id)?;
        writer.write_packed_int(i64::from(pool.position_of(identity)?));

        match &node.body {
            Body::Module { versions } => {
                writer.write_magnitude(versions.len())?;
                for &version in versions {
                    writer.write_packed_int(i64::from(pool.position_of(version)?));
                }
            }
            Body::Property { property_type } => {
                writer.write_packed_int(i64::from(pool.position_of(*property_type)?));
            }
            Body::Plain => {}
        }
        Ok(())
    }

    /// Write one child entry: a bare body for a single unconditional child, or the
    /// conditional form (marker byte, sibling count, then per sibling its condition's
    /// pool position and its body). The nested-children block follows, assembled into a
    /// temporary buffer first so its byte length can precede its bytes.
    ///
    /// # Errors
    /// Propagates assembly and deferred-load failures.
    pub fn assemble_child(
        &mut self,
        pool: &ConstantPool,
        eldest: ComponentId,
        writer: &mut Writer,
    ) -> Result<()> {
        let node = self.node(eldest)?;
        if node.sibling.is_some() || node.condition.is_some() {
            writer.write_u8(CONDITIONAL_MARKER);
            let chain = self.sibling_chain(eldest)?;
            writer.write_magnitude(chain.len())?;
            for &sibling in &chain {
                match self.node(sibling)?.condition {
                    Some(condition) => {
                        writer.write_packed_int(i64::from(pool.position_of(condition)?));
                    }
                    None => writer.write_packed_int(-1),
                }
                self.assemble_body(pool, sibling, writer)?;
            }
        } else {
            self.assemble_body(pool, eldest, writer)?;
        }

        self.realize(pool, eldest)?;
        if self.has_children(eldest)? {
            let mut nested = Writer::new();
            self.assemble_children(pool, eldest, &mut nested)?;
            let bytes = nested.into_bytes();
            writer.write_magnitude(bytes.len())?;
            writer.write_bytes(&bytes);
        } else {
            writer.write_magnitude(0)?;
        }
        Ok(())
    }

    /// Write the child block of this component: a packed count of distinct child keys
    /// followed by each child entry. Name keys are written in sorted order, then method
    /// keys ordered by their signature constant's position, so re-assembling an
    /// unmodified tree reproduces its bytes exactly.
    ///
    /// # Errors
    /// Propagates assembly and deferred-load failures.
    pub fn assemble_children(
        &mut self,
        pool: &ConstantPool,
        id: ComponentId,
        writer: &mut Writer,
    ) -> Result<()> {
        self.realize(pool, id)?;
        let eldests = self.eldest_children(pool, id)?;
        writer.write_magnitude(eldests.len())?;
        for eldest in eldests {
            self.assemble_child(pool, eldest, writer)?;
        }
        Ok(())
    }

    /// Read zero or more child entries into this component.
    ///
    /// With `lazy` set, each child's nested block is stored raw on its sibling group and
    /// deserialized only when first accessed; otherwise nested blocks are parsed
    /// immediately, recursively.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid structure and
    /// [`crate::Error::OutOfBounds`] for a truncated stream.
    pub fn disassemble_children(
        &mut self,
        pool: &ConstantPool,
        parent: ComponentId,
        parser: &mut Parser,
        lazy: bool,
    ) -> Result<()> {
        let count = parser.read_magnitude()?;
        for _ in 0..count {
            let lead = parser.read_u8()?;
            let eldest = if lead & CONDITIONAL_MARKER == 0 {
                let flags = (u16::from(lead) << 8) | u16::from(parser.read_u8()?);
                let child = self.read_component_body(pool, parent, flags, None, parser)?;
                self.add_child(pool, parent, child)?;
                child
            } else {
                if lead != CONDITIONAL_MARKER {
                    return Err(malformed_error!(
                        "Invalid component marker byte: {:#04x}",
                        lead
                    ));
                }
                let siblings = parser.read_magnitude()?;
                if siblings == 0 {
                    return Err(malformed_error!(
                        "Conditional component requires at least one sibling"
                    ));
                }

                let mut eldest = None;
                for _ in 0..siblings {
                    let condition = self.read_condition(pool, parser)?;
                    let flags = parser.read_u16_be()?;
                    let sibling =
                        self.read_component_body(pool, parent, flags, condition, parser)?;
                    self.add_child(pool, parent, sibling)?;
                    eldest.get_or_insert(sibling);
                }
                eldest.ok_or_else(|| malformed_error!("Empty sibling group"))?
            };

            let nested = parser.read_magnitude()? as usize;
            if nested > 0 {
                let bytes = parser.read_bytes(nested)?;
                if lazy {
                    let group = self.node(eldest)?.group;
                    self.group_cell_mut(group)?.children = ChildState::Unloaded(bytes.to_vec());
                } else {
                    let mut nested_parser = Parser::new(bytes);
                    self.disassemble_children(pool, eldest, &mut nested_parser, lazy)?;
                    if nested_parser.has_more_data() {
                        return Err(malformed_error!("Trailing bytes after child block"));
                    }
                }
            }
        }
        Ok(())
    }

    fn read_condition(
        &self,
        pool: &ConstantPool,
        parser: &mut Parser,
    ) -> Result<Option<ConstantRef>> {
        let index = parser.read_packed_int()?;
        let Some(condition) = pool.constant(index)? else {
            return Ok(None);
        };
        if !pool.format_of(condition)?.is_condition() {
            return Err(malformed_error!(
                "Constant at index {} is not a condition",
                index
            ));
        }
        Ok(Some(condition))
    }

    fn read_component_body(
        &mut self,
        pool: &ConstantPool,
        parent: ComponentId,
        flags: u16,
        condition: Option<ConstantRef>,
        parser: &mut Parser,
    ) -> Result<ComponentId> {
        if flags & 0x8000 != 0 {
            return Err(malformed_error!("Invalid component flags: {:#06x}", flags));
        }
        let format = ComponentFormat::from_repr((flags & FORMAT_MASK) as u8).ok_or_else(|| {
            malformed_error!("Unrecognized component format in flags {:#06x}", flags)
        })?;
        if format == ComponentFormat::File {
            return Err(malformed_error!("File components are not instantiable"));
        }

        let identity_index = parser.read_magnitude()?;
        let identity = pool
            .constant(i64::from(identity_index))?
            .ok_or_else(|| malformed_error!("Component requires an identity constant"))?;
        if !pool.format_of(identity)?.is_identity() {
            return Err(malformed_error!(
                "Constant at index {} is not an identity",
                identity_index
            ));
        }

        let body = match format {
            ComponentFormat::Module => {
                let count = parser.read_magnitude()? as usize;
                let mut versions = Vec::with_capacity(count);
                for _ in 0..count {
                    let index = parser.read_magnitude()?;
                    let version = pool
                        .constant(i64::from(index))?
                        .ok_or_else(|| malformed_error!("Module version constant required"))?;
                    if pool.format_of(version)? != ConstantFormat::Version {
                        return Err(malformed_error!(
                            "Constant at index {} is not a version",
                            index
                        ));
                    }
                    versions.push(version);
                }
                Body::Module { versions }
            }
            ComponentFormat::Property => {
                let index = parser.read_magnitude()?;
                let property_type = pool
                    .constant(i64::from(index))?
                    .ok_or_else(|| malformed_error!("Property type constant required"))?;
                if pool.format_of(property_type)? != ConstantFormat::ClassType {
                    return Err(malformed_error!("Constant at index {} is not a type", index));
                }
                Body::Property { property_type }
            }
            _ => Body::Plain,
        };

        Ok(self.new_node(Some(parent), flags, Some(identity), condition, body))
    }

    // ----- structural equality -------------------------------------------------------------

    /// Compare two components by value: their bodies and, recursively, their full child
    /// maps, sibling count and order included. The components may live in different trees
    /// backed by different pools; constants are compared by value, never by position.
    ///
    /// Deferred child blocks on both sides are realized first.
    ///
    /// # Errors
    /// Propagates deferred-load failures.
    pub fn deep_eq(
        &mut self,
        pool: &ConstantPool,
        id: ComponentId,
        other: &mut ComponentTree,
        other_pool: &ConstantPool,
        other_id: ComponentId,
    ) -> Result<bool> {
        self.realize_subtree(pool, id)?;
        other.realize_subtree(other_pool, other_id)?;
        Ok(self.body_eq(pool, id, other, other_pool, other_id)?
            && self.children_eq(pool, id, other, other_pool, other_id)?)
    }

    /// Realize every deferred child block under this component.
    ///
    /// # Errors
    /// Propagates deferred-load failures.
    pub fn realize_subtree(&mut self, pool: &ConstantPool, id: ComponentId) -> Result<()> {
        self.realize(pool, id)?;
        for eldest in self.eldest_children(pool, id)? {
            self.realize_subtree(pool, eldest)?;
        }
        Ok(())
    }

    fn body_eq(
        &self,
        pool: &ConstantPool,
        id: ComponentId,
        other: &ComponentTree,
        other_pool: &ConstantPool,
        other_id: ComponentId,
    ) -> Result<bool> {
        let a = self.node(id)?;
        let b = other.node(other_id)?;

        if a.flags != b.flags {
            return Ok(false);
        }
        let identities_match = match (a.identity, b.identity) {
            (Some(x), Some(y)) => pool.deep_eq(x, other_pool, y),
            (None, None) => true,
            _ => false,
        };
        let conditions_match = match (a.condition, b.condition) {
            (Some(x), Some(y)) => pool.deep_eq(x, other_pool, y),
            (None, None) => true,
            _ => false,
        };
        if !identities_match || !conditions_match {
            return Ok(false);
        }

        Ok(match (&a.body, &b.body) {
            (Body::Plain, Body::Plain) => true,
            (Body::Module { versions: va }, Body::Module { versions: vb }) => {
                va.len() == vb.len()
                    && va
                        .iter()
                        .zip(vb)
                        .all(|(&x, &y)| pool.deep_eq(x, other_pool, y))
            }
            (Body::Property { property_type: ta }, Body::Property { property_type: tb }) => {
                pool.deep_eq(*ta, other_pool, *tb)
            }
            _ => false,
        })
    }

    fn children_eq(
        &self,
        pool: &ConstantPool,
        id: ComponentId,
        other: &ComponentTree,
        other_pool: &ConstantPool,
        other_id: ComponentId,
    ) -> Result<bool> {
        let (ChildState::Loaded { by_name: names_a, methods: methods_a },
             ChildState::Loaded { by_name: names_b, methods: methods_b }) =
            (&self.group_of(id)?.children, &other.group_of(other_id)?.children)
        else {
            return Err(Error::Structure("children not realized".to_string()));
        };

        if names_a.len() != names_b.len() || methods_a.len() != methods_b.len() {
            return Ok(false);
        }

        for (name, &eldest_a) in names_a {
            let Some(&eldest_b) = names_b.get(name) else {
                return Ok(false);
            };
            if !self.chain_eq(pool, eldest_a, other, other_pool, eldest_b)? {
                return Ok(false);
            }
            if !self.children_eq(pool, eldest_a, other, other_pool, eldest_b)? {
                return Ok(false);
            }
        }

        for (&key_a, &eldest_a) in methods_a {
            let mut matched = false;
            for (&key_b, &eldest_b) in methods_b {
                if pool.deep_eq(key_a, other_pool, key_b) {
                    if !self.chain_eq(pool, eldest_a, other, other_pool, eldest_b)?
                        || !self.children_eq(pool, eldest_a, other, other_pool, eldest_b)?
                    {
                        return Ok(false);
                    }
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn chain_eq(
        &self,
        pool: &ConstantPool,
        eldest_a: ComponentId,
        other: &ComponentTree,
        other_pool: &ConstantPool,
        eldest_b: ComponentId,
    ) -> Result<bool> {
        let mut current_a = Some(eldest_a);
        let mut current_b = Some(eldest_b);
        loop {
            match (current_a, current_b) {
                (None, None) => return Ok(true),
                (Some(a), Some(b)) => {
                    if !self.body_eq(pool, a, other, other_pool, b)? {
                        return Ok(false);
                    }
                    current_a = self.node(a)?.sibling;
                    current_b = other.node(b)?.sibling;
                }
                _ => return Ok(false),
            }
        }
    }

    // ----- internal ------------------------------------------------------------------------

    fn new_node(
        &mut self,
        parent: Option<ComponentId>,
        flags: u16,
        identity: Option<ConstantRef>,
        condition: Option<ConstantRef>,
        body: Body,
    ) -> ComponentId {
        let group = GroupId(self.groups.len() as u32);
        self.groups.push(Group {
            children: ChildState::empty(),
        });

        let id = ComponentId(self.nodes.len() as u32);
        self.nodes.push(Node {
            flags,
            identity,
            condition,
            parent,
            sibling: None,
            group,
            body,
            documentation: None,
            modified: false,
        });
        id
    }

    /// Make sure any deferred child deserialization for this component's group is done.
    ///
    /// The raw bytes are taken from the shared group first, so every sibling observes the
    /// transition at once, then parsed with nested blocks kept lazy.
    fn realize(&mut self, pool: &ConstantPool, id: ComponentId) -> Result<()> {
        let group = self.node(id)?.group;
        let state = &mut self.group_cell_mut(group)?.children;
        let bytes = match state {
            ChildState::Unloaded(bytes) => std::mem::take(bytes),
            ChildState::Loaded { .. } => return Ok(()),
        };
        *state = ChildState::empty();

        let mut parser = Parser::new(&bytes);
        self.disassemble_children(pool, id, &mut parser, true)
            .map_err(|error| self.deferred_read_context(pool, id, error))?;
        if parser.has_more_data() {
            return Err(malformed_error!("Trailing bytes after deferred child block"));
        }
        Ok(())
    }

    /// Attach the owning component's identity to a deferred-read failure.
    fn deferred_read_context(&self, pool: &ConstantPool, id: ComponentId, error: Error) -> Error {
        let owner = self
            .name(pool, id)
            .map(str::to_string)
            .unwrap_or_else(|_| "<unnamed>".to_string());
        match error {
            Error::Malformed {
                message,
                file,
                line,
            } => Error::Malformed {
                message: format!("{message} (deferred read of children of \"{owner}\")"),
                file,
                line,
            },
            other => other,
        }
    }

    fn node(&self, id: ComponentId) -> Result<&Node> {
        self.nodes
            .get(id.0 as usize)
            .ok_or_else(|| Error::Structure(format!("invalid component id {}", id.0)))
    }

    fn node_mut(&mut self, id: ComponentId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::Structure(format!("invalid component id {}", id.0)))
    }

    fn group_of(&self, id: ComponentId) -> Result<&Group> {
        let group = self.node(id)?.group;
        self.groups
            .get(group.0 as usize)
            .ok_or_else(|| Error::Structure(format!("invalid group id {}", group.0)))
    }

    fn group_mut(&mut self, id: ComponentId) -> Result<&mut Group> {
        let group = self.node(id)?.group;
        self.group_cell_mut(group)
    }

    fn group_cell_mut(&mut self, group: GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(group.0 as usize)
            .ok_or_else(|| Error::Structure(format!("invalid group id {}", group.0)))
    }

    /// Clear the modification flag on every node, after an initial load.
    pub(crate) fn reset_all_modified(&mut self) {
        for node in &mut self.nodes {
            node.modified = false;
        }
    }

    fn module_body(&self, id: ComponentId) -> Result<&Vec<ConstantRef>> {
        match &self.node(id)?.body {
            Body::Module { versions } => Ok(versions),
            _ => Err(Error::Structure("component is not a module".to_string())),
        }
    }

    fn module_body_mut(&mut self, id: ComponentId) -> Result<&mut Vec<ConstantRef>> {
        match &mut self.node_mut(id)?.body {
            Body::Module { versions } => Ok(versions),
            _ => Err(Error::Structure("component is not a module".to_string())),
        }
    }

    fn require_identity(&self, id: ComponentId) -> Result<ConstantRef> {
        self.node(id)?
            .identity
            .ok_or_else(|| Error::Structure("component has no identity".to_string()))
    }

    fn named_child(&self, parent: ComponentId, name: &str) -> Result<Option<ComponentId>> {
        let group = self.group_of(parent)?;
        let ChildState::Loaded { by_name, .. } = &group.children else {
            return Err(Error::Structure("children not realized".to_string()));
        };
        Ok(by_name.get(name).copied())
    }

    fn has_children(&self, id: ComponentId) -> Result<bool> {
        let group = self.group_of(id)?;
        match &group.children {
            ChildState::Unloaded(_) => Ok(true),
            ChildState::Loaded { by_name, methods } => Ok(!by_name.is_empty() || !methods.is_empty()),
        }
    }

    /// The sorted child keys of a realized group: names ascending, then method signature
    /// constants by pool position.
    fn child_keys(&self, id: ComponentId) -> Result<(Vec<String>, Vec<ConstantRef>)> {
        let group = self.group_of(id)?;
        let ChildState::Loaded { by_name, methods } = &group.children else {
            return Err(Error::Structure("children not realized".to_string()));
        };

        let mut names: Vec<String> = by_name.keys().cloned().collect();
        names.sort();
        let mut method_keys: Vec<ConstantRef> = methods.keys().copied().collect();
        method_keys.sort_by_key(|key| key.slot);
        Ok((names, method_keys))
    }

    /// The eldest sibling of every child key, names sorted first, then methods ordered
    /// by their signature constant's pool position.
    fn eldest_children(&self, pool: &ConstantPool, id: ComponentId) -> Result<Vec<ComponentId>> {
        let group = self.group_of(id)?;
        let ChildState::Loaded { by_name, methods } = &group.children else {
            return Err(Error::Structure("children not realized".to_string()));
        };

        let mut named: Vec<(&String, ComponentId)> =
            by_name.iter().map(|(name, &child)| (name, child)).collect();
        named.sort_by(|a, b| a.0.cmp(b.0));

        let mut keyed: Vec<(u32, ComponentId)> = methods
            .iter()
            .map(|(&key, &child)| (pool.position_of(key).unwrap_or(key.slot), child))
            .collect();
        keyed.sort_by_key(|&(order, _)| order);

        Ok(named
            .into_iter()
            .map(|(_, child)| child)
            .chain(keyed.into_iter().map(|(_, child)| child))
            .collect())
    }

    fn sibling_chain(&self, eldest: ComponentId) -> Result<Vec<ComponentId>> {
        let mut chain = Vec::new();
        let mut current = Some(eldest);
        while let Some(sibling) = current {
            chain.push(sibling);
            current = self.node(sibling)?.sibling;
        }
        Ok(chain)
    }
}

fn compose_flags(format: ComponentFormat, access: Access, modifiers: Modifiers) -> Result<u16> {
    if access == Access::Struct {
        return Err(Error::InvalidArgument(
            "Struct access cannot be applied to a component".to_string(),
        ));
    }
    Ok(format as u16 | ((access as u16) << ACCESS_SHIFT) | modifiers.bits())
}

fn sort_versions(versions: &mut [ConstantRef], pool: &ConstantPool) {
    versions.sort_by(|&a, &b| {
        match (pool.version_value(a), pool.version_value(b)) {
            (Ok(x), Ok(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::context::StaticLinkerContext;

    fn module_fixture() -> (ComponentTree, ConstantPool, ComponentId) {
        let mut tree = ComponentTree::new();
        let mut pool = ConstantPool::new();
        let file = tree.new_file();
        let module = tree.new_module(&mut pool, file, "app").unwrap();
        (tree, pool, module)
    }

    #[test]
    fn container_rules() {
        let (mut tree, mut pool, module) = module_fixture();

        let package = tree
            .create_package(&mut pool, module, Access::Public, "util")
            .unwrap();
        let class = tree
            .create_class(&mut pool, package, Access::Public, ComponentFormat::Class, "List")
            .unwrap();

        // a class cannot contain a package
        assert!(matches!(
            tree.create_package(&mut pool, class, Access::Public, "bad"),
            Err(Error::Structure(_))
        ));
        // a module cannot be created as a class
        assert!(matches!(
            tree.create_class(&mut pool, module, Access::Public, ComponentFormat::Module, "M"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn setters_are_idempotent() {
        let (mut tree, mut pool, module) = module_fixture();
        let class = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "C")
            .unwrap();

        tree.reset_modified(class).unwrap();
        tree.set_abstract(class, true).unwrap();
        assert!(tree.is_modified(class).unwrap());

        tree.reset_modified(class).unwrap();
        tree.set_abstract(class, true).unwrap();
        assert!(!tree.is_modified(class).unwrap());
        assert!(tree.is_abstract(class).unwrap());

        tree.set_access(class, Access::Public).unwrap();
        assert!(!tree.is_modified(class).unwrap());
        tree.set_access(class, Access::Private).unwrap();
        assert!(tree.is_modified(class).unwrap());
        assert_eq!(tree.access(class).unwrap(), Access::Private);

        assert!(matches!(
            tree.set_access(class, Access::Struct),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn duplicate_names_form_sibling_chains() {
        let (mut tree, mut pool, module) = module_fixture();

        let v1 = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "util")
            .unwrap();
        let v2 = tree
            .create_package(&mut pool, module, Access::Public, "util")
            .unwrap();

        assert_eq!(tree.next_sibling(v1).unwrap(), Some(v2));
        assert_eq!(tree.next_sibling(v2).unwrap(), None);

        // children added through one sibling are visible through the other
        let inner = tree
            .create_class(&mut pool, v2, Access::Public, ComponentFormat::Class, "Inner")
            .unwrap();
        let found = tree
            .child_by_name(&pool, v1, "Inner", None)
            .unwrap()
            .unwrap();
        assert_eq!(found, Resolved::Single(inner));
    }

    #[test]
    fn merging_a_populated_sibling_fails() {
        let (mut tree, mut pool, module) = module_fixture();
        let class = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "A")
            .unwrap();
        tree.create_class(&mut pool, class, Access::Public, ComponentFormat::Class, "Kid")
            .unwrap();

        // a detached node with the same name as an existing child, carrying children
        let identity = pool
            .ensure_class(tree.identity(module).unwrap().unwrap(), "A")
            .unwrap();
        let flags = compose_flags(ComponentFormat::Class, Access::Public, Modifiers::empty())
            .unwrap();
        let rogue = tree.new_node(Some(module), flags, Some(identity), None, Body::Plain);
        tree.create_class(&mut pool, rogue, Access::Public, ComponentFormat::Class, "Kid2")
            .unwrap();

        assert!(matches!(
            tree.add_child(&pool, module, rogue),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn five_way_child_resolution() {
        let (mut tree, mut pool, module) = module_fixture();

        // case 1: no child by that name
        assert!(tree
            .child_by_name(&pool, module, "missing", None)
            .unwrap()
            .is_none());

        // case 2: one unconditional child
        let plain = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "Plain")
            .unwrap();
        assert_eq!(
            tree.child_by_name(&pool, module, "Plain", None).unwrap(),
            Some(Resolved::Single(plain))
        );

        // conditional siblings
        let x = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "util")
            .unwrap();
        let y = tree
            .create_package(&mut pool, module, Access::Public, "util")
            .unwrap();
        let cond_x = pool.ensure_named_condition("x").unwrap();
        let cond_y = pool.ensure_named_condition("y").unwrap();
        tree.set_condition(x, Some(cond_x)).unwrap();
        tree.set_condition(y, Some(cond_y)).unwrap();

        // no context selects all siblings
        let all = tree.child_by_name(&pool, module, "util", None).unwrap();
        assert_eq!(all, Some(Resolved::Composite(vec![x, y])));

        // case 4: one condition matches
        let only_x = StaticLinkerContext::new().specify("x");
        assert_eq!(
            tree.child_by_name(&pool, module, "util", Some(&only_x)).unwrap(),
            Some(Resolved::Single(x))
        );

        // case 3: no condition matches
        let neither = StaticLinkerContext::new();
        assert!(tree
            .child_by_name(&pool, module, "util", Some(&neither))
            .unwrap()
            .is_none());

        // case 5: multiple conditions match
        let both = StaticLinkerContext::new().specify("x").specify("y");
        assert_eq!(
            tree.child_by_name(&pool, module, "util", Some(&both)).unwrap(),
            Some(Resolved::Composite(vec![x, y]))
        );
    }

    #[test]
    fn methods_are_keyed_by_signature() {
        let (mut tree, mut pool, module) = module_fixture();
        let class = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "Num")
            .unwrap();
        let int_class = pool
            .ensure_class(tree.identity(module).unwrap().unwrap(), "Int")
            .unwrap();
        let int_type = pool.ensure_class_type(int_class, Access::Public).unwrap();

        let unary = tree
            .create_method(&mut pool, class, Access::Public, "add", &[int_type], &[int_type])
            .unwrap();
        let binary = tree
            .create_method(
                &mut pool,
                class,
                Access::Public,
                "add",
                &[int_type, int_type],
                &[int_type],
            )
            .unwrap();
        assert_ne!(unary, binary);

        // both overloads hang off one multi-method
        let multi = tree.ensure_multi_method(&mut pool, class, "add").unwrap();
        assert_eq!(tree.format(multi).unwrap(), ComponentFormat::MultiMethod);

        let unary_identity = tree.identity(unary).unwrap().unwrap();
        let found = tree
            .child_by_identity(&pool, multi, unary_identity, None)
            .unwrap()
            .unwrap();
        assert_eq!(found, Resolved::Single(unary));
    }

    #[test]
    fn parent_is_rederived_through_conditional_parents() {
        let (mut tree, mut pool, module) = module_fixture();

        let class_v1 = tree
            .create_class(&mut pool, module, Access::Protected, ComponentFormat::Class, "C")
            .unwrap();
        let class_v2 = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "C")
            .unwrap();
        let cond_v1 = pool.ensure_named_condition("v1").unwrap();
        let cond_v2 = pool.ensure_named_condition("v2").unwrap();
        tree.set_condition(class_v1, Some(cond_v1)).unwrap();
        tree.set_condition(class_v2, Some(cond_v2)).unwrap();

        let prop_class = pool.ensure_class(tree.identity(module).unwrap().unwrap(), "Int").unwrap();
        let prop_type = pool.ensure_class_type(prop_class, Access::Public).unwrap();
        let property = tree
            .create_property(&mut pool, class_v1, false, Access::Public, prop_type, "size")
            .unwrap();

        // unconditional physical parent: the module resolves directly
        assert_eq!(
            tree.resolve_parent(&pool, class_v1, None).unwrap(),
            Some(Resolved::Single(module))
        );

        // conditional parent: re-derived through the grandparent per context
        let v2_only = StaticLinkerContext::new().specify("v2");
        assert_eq!(
            tree.resolve_parent(&pool, property, Some(&v2_only)).unwrap(),
            Some(Resolved::Single(class_v2))
        );
        let v1_only = StaticLinkerContext::new().specify("v1");
        assert_eq!(
            tree.resolve_parent(&pool, property, Some(&v1_only)).unwrap(),
            Some(Resolved::Single(class_v1))
        );
    }

    #[test]
    fn visitation_order_and_flags() {
        let (mut tree, mut pool, module) = module_fixture();
        let a1 = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "A")
            .unwrap();
        let a2 = tree
            .create_package(&mut pool, module, Access::Public, "A")
            .unwrap();
        let b = tree
            .create_class(&mut pool, module, Access::Public, ComponentFormat::Class, "B")
            .unwrap();
        let nested = tree
            .create_class(&mut pool, b, Access::Public, ComponentFormat::Class, "Nested")
            .unwrap();

        let mut eldest_only = Vec::new();
        tree.visit_children(&pool, module, false, false, &mut |_, id| eldest_only.push(id))
            .unwrap();
        assert_eq!(eldest_only, vec![a1, b]);

        let mut deep = Vec::new();
        tree.visit_children(&pool, module, true, true, &mut |_, id| deep.push(id))
            .unwrap();
        assert_eq!(deep, vec![a1, a2, b, nested]);
    }

    #[test]
    fn module_version_labels() {
        let (mut tree, mut pool, module) = module_fixture();
        let v1: Version = "1".parse().unwrap();
        let v2: Version = "2".parse().unwrap();
        let v2_1: Version = "2.1".parse().unwrap();

        assert!(!tree.is_versioned(module).unwrap());
        tree.label_version(&mut pool, module, &v1).unwrap();
        tree.add_version(&mut pool, module, &v2_1).unwrap();
        tree.add_version(&mut pool, module, &v2).unwrap();
        assert_eq!(
            tree.module_versions(&pool, module).unwrap(),
            vec![v1.clone(), v2.clone(), v2_1.clone()]
        );

        // labeling is refused once multiple labels exist
        assert!(matches!(
            tree.label_version(&mut pool, module, &v1),
            Err(Error::Structure(_))
        ));

        assert!(tree.supports_version(&pool, module, &v2, false).unwrap());
        assert!(tree.supports_version(&pool, module, &"2.0".parse().unwrap(), false).unwrap());
        assert!(!tree.supports_version(&pool, module, &"3".parse().unwrap(), false).unwrap());

        tree.purge_version(&mut pool, module, &v2).unwrap();
        assert_eq!(
            tree.module_versions(&pool, module).unwrap(),
            vec![v1.clone(), v2_1.clone()]
        );
        assert!(matches!(
            tree.purge_version(&mut pool, module, &v2),
            Err(Error::InvalidArgument(_))
        ));

        tree.purge_all_except_version(&mut pool, module, &v2_1).unwrap();
        assert_eq!(tree.module_versions(&pool, module).unwrap(), vec![v2_1]);
    }
}
