//! The shared pool of all constants used by one module file.
//!
//! A [`ConstantPool`] owns every [`Constant`](crate::assembly::constant::Constant) that a
//! component tree refers to and guarantees that each structural value exists exactly once.
//! The pool provides three things:
//!
//! - **Interning** - [`ConstantPool::register`] returns the canonical handle for a value,
//!   creating it only when no structurally equal constant exists yet
//! - **Typed factories** - the `ensure_*` methods validate their arguments, consult a cheap
//!   locator index for common literals, and fall back to full interning
//! - **Optimization** - a bracketed [`ConstantPool::pre_register_all`] /
//!   [`ConstantPool::post_register_all`] pass counts how often each constant is actually
//!   used, then discards unused constants and orders the survivors most-used-first so the
//!   hottest constants get the shortest packed indices
//!
//! Cross-references between constants are serialized as packed pool positions and resolved
//! in a second pass after a bulk load, since a constant may refer to one that appears later
//! in the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::assembly::constant::{Access, Constant, ConstantFormat, ConstantRef, ConstantValue};
use crate::assembly::context::LinkerContext;
use crate::assembly::version::Version;
use crate::file::parser::Parser;
use crate::file::writer::Writer;
use crate::{Error, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A cheap secondary key for re-looking-up common constants without building a full
/// structural value first. Only some formats support a locator, and class types only
/// when their access is public.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Locator {
    Byte(u8),
    Char(char),
    CharString(String),
    Int(i64),
    Version(String),
    Module(String),
    NamedCondition(String),
    ClassType(ConstantRef),
}

/// The owning registry of all constants for one compilation unit.
///
/// # Examples
///
/// ```rust
/// use manifold::ConstantPool;
///
/// let mut pool = ConstantPool::new();
/// let first = pool.ensure_string("greeting")?;
/// let second = pool.ensure_string("greeting")?;
///
/// // structurally equal requests intern to the same constant
/// assert_eq!(first, second);
/// assert_eq!(pool.len(), 1);
/// # Ok::<(), manifold::Error>(())
/// ```
#[derive(Debug)]
pub struct ConstantPool {
    /// Identity of this pool, baked into every handle it mints.
    id: u64,
    /// Slot storage; a slot is vacated when optimization discards its constant.
    slots: Vec<Option<Constant>>,
    /// Serialization order: position to slot.
    order: Vec<u32>,
    /// Interning index from structural value to slot.
    by_value: HashMap<ConstantValue, u32>,
    /// Locator index for fast re-lookup of common literals.
    by_locator: HashMap<Locator, u32>,
    /// False after optimization invalidates the lookup indices; they are rebuilt lazily.
    lookup_valid: bool,
    /// True between `pre_register_all` and `post_register_all`, enabling usage counting.
    counting: bool,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl ConstantPool {
    /// Construct an empty pool.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            order: Vec::new(),
            by_value: HashMap::new(),
            by_locator: HashMap::new(),
            lookup_valid: true,
            counting: false,
        }
    }

    /// The number of constants currently held by the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the pool holds no constants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Obtain the constant stored at the given position.
    ///
    /// The index `-1` is the "no constant" sentinel and yields `None`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the index is neither the sentinel nor a
    /// valid position.
    pub fn constant(&self, index: i64) -> Result<Option<ConstantRef>> {
        if index == -1 {
            return Ok(None);
        }

        let position = usize::try_from(index).map_err(|_| Error::OutOfBounds)?;
        match self.order.get(position) {
            Some(&slot) => Ok(Some(self.handle(slot))),
            None => Err(Error::OutOfBounds),
        }
    }

    /// The structural value behind a handle.
    ///
    /// # Errors
    /// Returns [`crate::Error::CrossPool`] for a handle minted by a different pool, or
    /// [`crate::Error::Structure`] if the constant was discarded by optimization.
    pub fn value(&self, constant: ConstantRef) -> Result<&ConstantValue> {
        self.check_handle(constant)?;
        Ok(&self.slot_ref(constant.slot)?.value)
    }

    /// The format tag of the constant behind a handle.
    ///
    /// # Errors
    /// Same conditions as [`ConstantPool::value`].
    pub fn format_of(&self, constant: ConstantRef) -> Result<ConstantFormat> {
        Ok(self.value(constant)?.format())
    }

    /// The serialization position of the constant behind a handle.
    ///
    /// # Errors
    /// Same conditions as [`ConstantPool::value`], plus [`crate::Error::Structure`] if the
    /// constant has no position assigned.
    pub fn position_of(&self, constant: ConstantRef) -> Result<u32> {
        self.check_handle(constant)?;
        self.slot_ref(constant.slot)?.position.ok_or_else(|| {
            Error::Structure("constant has not been assigned a pool position".to_string())
        })
    }

    /// The string payload of a `CharString` constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the constant is not a `CharString`, plus the
    /// conditions of [`ConstantPool::value`].
    pub fn string_value(&self, constant: ConstantRef) -> Result<&str> {
        match self.value(constant)? {
            ConstantValue::CharString(text) => Ok(text),
            other => Err(Error::Structure(format!(
                "expected a CharString constant, found {:?}",
                other.format()
            ))),
        }
    }

    /// The version payload of a `Version` constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the constant is not a `Version`, plus the
    /// conditions of [`ConstantPool::value`].
    pub fn version_value(&self, constant: ConstantRef) -> Result<&Version> {
        match self.value(constant)? {
            ConstantValue::Version(version) => Ok(version),
            other => Err(Error::Structure(format!(
                "expected a Version constant, found {:?}",
                other.format()
            ))),
        }
    }

    /// The name carried by an identity constant.
    ///
    /// Modules yield their qualified name; methods yield the name of their multi-method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the constant does not carry a name.
    pub fn name_of(&self, identity: ConstantRef) -> Result<&str> {
        match self.value(identity)? {
            ConstantValue::Module { name }
            | ConstantValue::Package { name, .. }
            | ConstantValue::Class { name, .. }
            | ConstantValue::Property { name, .. }
            | ConstantValue::MultiMethod { name, .. } => self.string_value(*name),
            ConstantValue::Method { multi_method, .. } => self.name_of(*multi_method),
            other => Err(Error::Structure(format!(
                "constant {:?} does not carry a name",
                other.format()
            ))),
        }
    }

    // ----- registration --------------------------------------------------------------------

    /// Register a structural value, returning the canonical handle for it.
    ///
    /// If a structurally equal constant already exists, its handle is returned and the
    /// caller must use it in lieu of building a duplicate. Otherwise the value is assigned
    /// the next position and inserted into the lookup indices. Every constant a value
    /// refers to is necessarily registered already, because building the value requires
    /// handles from this pool.
    ///
    /// During the bracketed re-registration pass this additionally counts one usage, and
    /// the first usage of a constant recursively counts its dependencies.
    ///
    /// # Errors
    /// Returns [`crate::Error::CrossPool`] if the value embeds a handle minted by a
    /// different pool.
    pub fn register(&mut self, value: ConstantValue) -> Result<ConstantRef> {
        for referenced in value.referenced() {
            self.check_handle(referenced)?;
        }

        self.ensure_lookup();
        let slot = match self.by_value.get(&value).copied() {
            Some(slot) => slot,
            None => {
                let slot = u32::try_from(self.slots.len()).map_err(|_| {
                    Error::Structure("constant pool slot space exhausted".to_string())
                })?;
                let position = self.order.len() as u32;

                self.slots.push(Some(Constant {
                    value: value.clone(),
                    position: Some(position),
                    refs: 0,
                }));
                self.order.push(slot);
                if let Some(locator) = self.locator_of(&value) {
                    self.by_locator.insert(locator, slot);
                }
                self.by_value.insert(value, slot);
                slot
            }
        };

        self.note_registration(slot)?;
        Ok(self.handle(slot))
    }

    /// Re-register an existing constant by handle.
    ///
    /// This is the entry point used by the bulk re-registration traversal over a component
    /// tree: outside the counting pass it is a no-op, inside it it counts one usage (and,
    /// on the first usage, the usages of every dependency).
    ///
    /// # Errors
    /// Returns [`crate::Error::CrossPool`] for a foreign handle or
    /// [`crate::Error::Structure`] for a discarded constant.
    pub fn register_ref(&mut self, constant: ConstantRef) -> Result<ConstantRef> {
        self.check_handle(constant)?;
        self.note_registration(constant.slot)?;
        Ok(constant)
    }

    fn note_registration(&mut self, slot: u32) -> Result<()> {
        if !self.counting {
            return Ok(());
        }

        let constant = self.slot_mut(slot)?;
        let first_use = constant.refs == 0;
        constant.refs += 1;

        if first_use {
            let dependencies = self.slot_ref(slot)?.value.referenced();
            for dependency in dependencies {
                self.note_registration(dependency.slot)?;
            }
        }
        Ok(())
    }

    /// Begin the usage-counting bracket that precedes assembly.
    ///
    /// Resets every constant's usage count to zero and enables counting on subsequent
    /// registrations. The caller then re-registers every constant reachable from the live
    /// component tree and closes the bracket with [`ConstantPool::post_register_all`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if a counting bracket is already open.
    pub fn pre_register_all(&mut self) -> Result<()> {
        if self.counting {
            return Err(Error::Structure(
                "constant registration pass already in progress".to_string(),
            ));
        }

        self.counting = true;
        for constant in self.slots.iter_mut().flatten() {
            constant.refs = 0;
        }
        Ok(())
    }

    /// Close the usage-counting bracket, optionally optimizing the pool.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if no counting bracket is open.
    pub fn post_register_all(&mut self, optimize: bool) -> Result<()> {
        if !self.counting {
            return Err(Error::Structure(
                "no constant registration pass in progress".to_string(),
            ));
        }

        self.counting = false;
        if optimize {
            self.optimize()?;
        }
        Ok(())
    }

    /// Discard unused constants and order the survivors most-used-first.
    ///
    /// Ties are broken by original position, so the result is deterministic. Discarded
    /// constants lose their position before their slot is vacated; both lookup indices are
    /// invalidated and rebuilt on next use, since every surviving position has changed.
    fn optimize(&mut self) -> Result<()> {
        let mut entries = Vec::with_capacity(self.order.len());
        for (position, &slot) in self.order.iter().enumerate() {
            let refs = self.slot_ref(slot)?.refs;
            entries.push((slot, refs, position as u32));
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut order = Vec::with_capacity(entries.len());
        for (slot, refs, _) in entries {
            if refs > 0 {
                let position = order.len() as u32;
                self.slot_mut(slot)?.position = Some(position);
                order.push(slot);
            } else {
                self.slot_mut(slot)?.position = None;
                self.slots[slot as usize] = None;
            }
        }

        self.order = order;
        self.by_value.clear();
        self.by_locator.clear();
        self.lookup_valid = false;
        Ok(())
    }

    // ----- typed factories -----------------------------------------------------------------

    /// Obtain the constant for the given byte value.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_byte(&mut self, value: u8) -> Result<ConstantRef> {
        if let Some(found) = self.find_by_locator(&Locator::Byte(value)) {
            return Ok(found);
        }
        self.register(ConstantValue::Byte(value))
    }

    /// Obtain the constant for the given character value.
    ///
    /// Only code points at or below `0x7F` participate in the locator cache.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_char(&mut self, value: char) -> Result<ConstantRef> {
        if (value as u32) <= 0x7F {
            if let Some(found) = self.find_by_locator(&Locator::Char(value)) {
                return Ok(found);
            }
        }
        self.register(ConstantValue::Char(value))
    }

    /// Obtain the constant for the given string value.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_string(&mut self, value: &str) -> Result<ConstantRef> {
        if let Some(found) = self.find_by_locator(&Locator::CharString(value.to_string())) {
            return Ok(found);
        }
        self.register(ConstantValue::CharString(value.to_string()))
    }

    /// Obtain the constant for the given byte-string value.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_byte_string(&mut self, value: &[u8]) -> Result<ConstantRef> {
        self.register(ConstantValue::ByteString(value.to_vec()))
    }

    /// Obtain the constant for the given integer value.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_int(&mut self, value: i64) -> Result<ConstantRef> {
        if let Some(found) = self.find_by_locator(&Locator::Int(value)) {
            return Ok(found);
        }
        self.register(ConstantValue::Int(value))
    }

    /// Obtain the constant for the given version label.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_version(&mut self, version: &Version) -> Result<ConstantRef> {
        if let Some(found) = self.find_by_locator(&Locator::Version(version.to_string())) {
            return Ok(found);
        }
        self.register(ConstantValue::Version(version.clone()))
    }

    /// Obtain the identity constant for the module with the given qualified name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an illegal qualified module name.
    pub fn ensure_module(&mut self, name: &str) -> Result<ConstantRef> {
        if !is_valid_qualified_module(name) {
            return Err(Error::InvalidArgument(format!(
                "illegal qualified module name: {name:?}"
            )));
        }

        if let Some(found) = self.find_by_locator(&Locator::Module(name.to_string())) {
            return Ok(found);
        }

        let name = self.ensure_string(name)?;
        self.register(ConstantValue::Module { name })
    }

    /// Obtain the identity constant for a package within the given module or package.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the parent is not a module or package
    /// identity, or if the package name is not a legal identifier.
    pub fn ensure_package(&mut self, parent: ConstantRef, name: &str) -> Result<ConstantRef> {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidArgument(format!(
                "illegal package name: {name}"
            )));
        }

        let parent_format = self.format_of(parent)?;
        if !matches!(
            parent_format,
            ConstantFormat::Module | ConstantFormat::Package
        ) {
            return Err(Error::InvalidArgument(format!(
                "constant {parent_format:?} is not a Module or Package"
            )));
        }

        let name = self.ensure_string(name)?;
        self.register(ConstantValue::Package { parent, name })
    }

    /// Obtain the identity constant for a class within the given container.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the parent is not a module, package,
    /// class, or method identity, or if the class name is not a legal identifier.
    pub fn ensure_class(&mut self, parent: ConstantRef, name: &str) -> Result<ConstantRef> {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidArgument(format!("illegal class name: {name}")));
        }

        let parent_format = self.format_of(parent)?;
        if !matches!(
            parent_format,
            ConstantFormat::Module
                | ConstantFormat::Package
                | ConstantFormat::Class
                | ConstantFormat::Method
        ) {
            return Err(Error::InvalidArgument(format!(
                "constant {parent_format:?} is not a Module, Package, Class, or Method"
            )));
        }

        let name = self.ensure_string(name)?;
        self.register(ConstantValue::Class { parent, name })
    }

    /// Obtain the identity constant for a property within the given container.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the parent is not a module, package,
    /// class, or method identity, or if the property name is not a legal identifier.
    pub fn ensure_property(&mut self, parent: ConstantRef, name: &str) -> Result<ConstantRef> {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidArgument(format!(
                "illegal property name: {name}"
            )));
        }

        let parent_format = self.format_of(parent)?;
        if !matches!(
            parent_format,
            ConstantFormat::Module
                | ConstantFormat::Package
                | ConstantFormat::Class
                | ConstantFormat::Method
        ) {
            return Err(Error::InvalidArgument(format!(
                "constant {parent_format:?} is not a Module, Package, Class, or Method"
            )));
        }

        let name = self.ensure_string(name)?;
        self.register(ConstantValue::Property { parent, name })
    }

    /// Obtain the identity constant for the named group of method overloads within the
    /// given container.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the parent cannot contain methods or
    /// the name is not a legal identifier.
    pub fn ensure_multi_method(&mut self, parent: ConstantRef, name: &str) -> Result<ConstantRef> {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidArgument(format!(
                "illegal method name: {name}"
            )));
        }

        let parent_format = self.format_of(parent)?;
        if !matches!(
            parent_format,
            ConstantFormat::Module
                | ConstantFormat::Package
                | ConstantFormat::Class
                | ConstantFormat::Property
                | ConstantFormat::Method
        ) {
            return Err(Error::InvalidArgument(format!(
                "constant {parent_format:?} is not a Module, Package, Class, Method, or Property"
            )));
        }

        let name = self.ensure_string(name)?;
        self.register(ConstantValue::MultiMethod { parent, name })
    }

    /// Obtain the identity constant for a method, building (or finding) the multi-method
    /// identity for its name along the way.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the parent cannot contain methods, the
    /// name is not a legal identifier, or any parameter or return type is not a class
    /// type constant.
    pub fn ensure_method(
        &mut self,
        parent: ConstantRef,
        name: &str,
        access: Access,
        params: &[ConstantRef],
        returns: &[ConstantRef],
    ) -> Result<ConstantRef> {
        for &type_constant in params.iter().chain(returns) {
            let format = self.format_of(type_constant)?;
            if format != ConstantFormat::ClassType {
                return Err(Error::InvalidArgument(format!(
                    "constant {format:?} is not a type"
                )));
            }
        }

        let multi_method = self.ensure_multi_method(parent, name)?;
        self.register(ConstantValue::Method {
            multi_method,
            access,
            params: params.to_vec(),
            returns: returns.to_vec(),
        })
    }

    /// Obtain the type descriptor for a class identity at the given access level.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the class constant is not a module,
    /// package, or class identity.
    pub fn ensure_class_type(&mut self, class: ConstantRef, access: Access) -> Result<ConstantRef> {
        let class_format = self.format_of(class)?;
        if !matches!(
            class_format,
            ConstantFormat::Module | ConstantFormat::Package | ConstantFormat::Class
        ) {
            return Err(Error::InvalidArgument(format!(
                "constant {class_format:?} is not a Module, Package, or Class"
            )));
        }

        if access == Access::Public {
            if let Some(found) = self.find_by_locator(&Locator::ClassType(class)) {
                return Ok(found);
            }
        }
        self.register(ConstantValue::ClassType { class, access })
    }

    /// Obtain the condition testing whether the given build option is specified.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_named_condition(&mut self, name: &str) -> Result<ConstantRef> {
        if let Some(found) = self.find_by_locator(&Locator::NamedCondition(name.to_string())) {
            return Ok(found);
        }

        let name = self.ensure_string(name)?;
        self.register(ConstantValue::ConditionNamed { name })
    }

    /// Obtain the condition testing whether the module being linked carries the given
    /// version.
    ///
    /// # Errors
    /// Propagates registration failures.
    pub fn ensure_versioned_condition(&mut self, version: &Version) -> Result<ConstantRef> {
        let version = self.ensure_version(version)?;
        self.register(ConstantValue::ConditionVersioned { version })
    }

    /// Obtain the condition testing for the presence of the identified structure.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant is not an identity.
    pub fn ensure_present_condition(&mut self, identity: ConstantRef) -> Result<ConstantRef> {
        self.check_identity(identity)?;
        self.register(ConstantValue::ConditionPresent {
            identity,
            version: None,
            exact: false,
        })
    }

    /// Obtain the condition testing for the presence of the identified structure at the
    /// given version.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant is not an identity.
    pub fn ensure_present_version_condition(
        &mut self,
        identity: ConstantRef,
        version: &Version,
        exact: bool,
    ) -> Result<ConstantRef> {
        self.check_identity(identity)?;
        let version = self.ensure_version(version)?;
        self.register(ConstantValue::ConditionPresent {
            identity,
            version: Some(version),
            exact,
        })
    }

    /// Obtain the negation of the given condition.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant is not a condition.
    pub fn ensure_not_condition(&mut self, condition: ConstantRef) -> Result<ConstantRef> {
        self.check_condition(condition)?;
        self.register(ConstantValue::ConditionNot(condition))
    }

    /// Obtain the conjunction of the given conditions.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if fewer than two conditions are given or
    /// any member is not a condition.
    pub fn ensure_all_condition(&mut self, conditions: &[ConstantRef]) -> Result<ConstantRef> {
        if conditions.len() < 2 {
            return Err(Error::InvalidArgument(
                "at least 2 conditions required".to_string(),
            ));
        }
        for &condition in conditions {
            self.check_condition(condition)?;
        }
        self.register(ConstantValue::ConditionAll(conditions.to_vec()))
    }

    /// Obtain the disjunction of the given conditions.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if fewer than two conditions are given or
    /// any member is not a condition.
    pub fn ensure_any_condition(&mut self, conditions: &[ConstantRef]) -> Result<ConstantRef> {
        if conditions.len() < 2 {
            return Err(Error::InvalidArgument(
                "at least 2 conditions required".to_string(),
            ));
        }
        for &condition in conditions {
            self.check_condition(condition)?;
        }
        self.register(ConstantValue::ConditionAny(conditions.to_vec()))
    }

    // ----- condition evaluation ------------------------------------------------------------

    /// Evaluate a boolean condition constant against the given linker context.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if the constant is not a condition.
    pub fn evaluate_condition(
        &self,
        condition: ConstantRef,
        context: &dyn LinkerContext,
    ) -> Result<bool> {
        match self.value(condition)? {
            ConstantValue::ConditionNamed { name } => {
                Ok(context.is_specified(self.string_value(*name)?))
            }
            ConstantValue::ConditionVersioned { version } => {
                Ok(context.matches_version(self.version_value(*version)?, false))
            }
            ConstantValue::ConditionPresent {
                identity,
                version,
                exact,
            } => {
                if !context.is_present(self.value(*identity)?) {
                    return Ok(false);
                }
                match version {
                    Some(version) => {
                        Ok(context.matches_version(self.version_value(*version)?, *exact))
                    }
                    None => Ok(true),
                }
            }
            ConstantValue::ConditionNot(inner) => Ok(!self.evaluate_condition(*inner, context)?),
            ConstantValue::ConditionAll(members) => {
                for &member in members {
                    if !self.evaluate_condition(member, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConstantValue::ConditionAny(members) => {
                for &member in members {
                    if self.evaluate_condition(member, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(Error::Structure(format!(
                "constant {:?} is not a condition",
                other.format()
            ))),
        }
    }

    // ----- structural comparison -----------------------------------------------------------

    /// Compare two constants by value, following cross-references recursively.
    ///
    /// The constants may belong to different pools; comparison never consults positions or
    /// slots, only payloads.
    #[must_use]
    pub fn deep_eq(&self, a: ConstantRef, other: &ConstantPool, b: ConstantRef) -> bool {
        let (Ok(va), Ok(vb)) = (self.value(a), other.value(b)) else {
            return false;
        };

        match (va, vb) {
            (ConstantValue::Byte(x), ConstantValue::Byte(y)) => x == y,
            (ConstantValue::Char(x), ConstantValue::Char(y)) => x == y,
            (ConstantValue::CharString(x), ConstantValue::CharString(y)) => x == y,
            (ConstantValue::ByteString(x), ConstantValue::ByteString(y)) => x == y,
            (ConstantValue::Int(x), ConstantValue::Int(y)) => x == y,
            (ConstantValue::Version(x), ConstantValue::Version(y)) => x == y,
            (ConstantValue::Module { name: x }, ConstantValue::Module { name: y }) => {
                self.deep_eq(*x, other, *y)
            }
            (
                ConstantValue::Package {
                    parent: pa,
                    name: na,
                },
                ConstantValue::Package {
                    parent: pb,
                    name: nb,
                },
            )
            | (
                ConstantValue::Class {
                    parent: pa,
                    name: na,
                },
                ConstantValue::Class {
                    parent: pb,
                    name: nb,
                },
            )
            | (
                ConstantValue::Property {
                    parent: pa,
                    name: na,
                },
                ConstantValue::Property {
                    parent: pb,
                    name: nb,
                },
            )
            | (
                ConstantValue::MultiMethod {
                    parent: pa,
                    name: na,
                },
                ConstantValue::MultiMethod {
                    parent: pb,
                    name: nb,
                },
            ) => self.deep_eq(*pa, other, *pb) && self.deep_eq(*na, other, *nb),
            (
                ConstantValue::Method {
                    multi_method: ma,
                    access: aa,
                    params: pa,
                    returns: ra,
                },
                ConstantValue::Method {
                    multi_method: mb,
                    access: ab,
                    params: pb,
                    returns: rb,
                },
            ) => {
                aa == ab
                    && self.deep_eq(*ma, other, *mb)
                    && self.deep_eq_all(pa, other, pb)
                    && self.deep_eq_all(ra, other, rb)
            }
            (
                ConstantValue::ClassType {
                    class: ca,
                    access: aa,
                },
                ConstantValue::ClassType {
                    class: cb,
                    access: ab,
                },
            ) => aa == ab && self.deep_eq(*ca, other, *cb),
            (
                ConstantValue::ConditionNamed { name: x },
                ConstantValue::ConditionNamed { name: y },
            ) => self.deep_eq(*x, other, *y),
            (
                ConstantValue::ConditionVersioned { version: x },
                ConstantValue::ConditionVersioned { version: y },
            ) => self.deep_eq(*x, other, *y),
            (
                ConstantValue::ConditionPresent {
                    identity: ia,
                    version: va,
                    exact: ea,
                },
                ConstantValue::ConditionPresent {
                    identity: ib,
                    version: vb,
                    exact: eb,
                },
            ) => {
                ea == eb
                    && self.deep_eq(*ia, other, *ib)
                    && match (va, vb) {
                        (Some(x), Some(y)) => self.deep_eq(*x, other, *y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (ConstantValue::ConditionNot(x), ConstantValue::ConditionNot(y)) => {
                self.deep_eq(*x, other, *y)
            }
            (ConstantValue::ConditionAll(xs), ConstantValue::ConditionAll(ys))
            | (ConstantValue::ConditionAny(xs), ConstantValue::ConditionAny(ys)) => {
                self.deep_eq_all(xs, other, ys)
            }
            _ => false,
        }
    }

    fn deep_eq_all(&self, xs: &[ConstantRef], other: &ConstantPool, ys: &[ConstantRef]) -> bool {
        xs.len() == ys.len()
            && xs
                .iter()
                .zip(ys)
                .all(|(&x, &y)| self.deep_eq(x, other, y))
    }

    // ----- (de)serialization ---------------------------------------------------------------

    /// Write the pool section: a packed constant count, then each constant as a one-byte
    /// format tag followed by its payload, in position order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if any referenced constant has no position.
    pub fn assemble(&self, writer: &mut Writer) -> Result<()> {
        writer.write_magnitude(self.order.len())?;
        for &slot in &self.order {
            let constant = self.slot_ref(slot)?;
            writer.write_u8(constant.value.format() as u8);
            self.assemble_payload(&constant.value, writer)?;
        }
        Ok(())
    }

    /// Read a pool section, resolving cross-references in a second pass once every
    /// constant has been loaded.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown format tag or an inconsistent
    /// cross-reference, and [`crate::Error::OutOfBounds`] for a truncated stream.
    pub fn disassemble(parser: &mut Parser) -> Result<ConstantPool> {
        let mut pool = ConstantPool::new();

        let count = pool_count(parser)?;
        for position in 0..count {
            let tag = parser.read_u8()?;
            let format = ConstantFormat::from_repr(tag)
                .ok_or_else(|| malformed_error!("Unsupported constant format: {}", tag))?;

            let value = pool.disassemble_payload(format, parser)?;
            pool.slots.push(Some(Constant {
                value,
                position: Some(position),
                refs: 0,
            }));
            pool.order.push(position);
        }

        pool.resolve_references()?;
        pool.lookup_valid = pool.slots.is_empty();
        Ok(pool)
    }

    fn assemble_payload(&self, value: &ConstantValue, writer: &mut Writer) -> Result<()> {
        match value {
            ConstantValue::Byte(byte) => writer.write_u8(*byte),
            ConstantValue::Char(character) => writer.write_packed_int(i64::from(*character as u32)),
            ConstantValue::CharString(text) => writer.write_prefixed_string(text)?,
            ConstantValue::ByteString(bytes) => {
                writer.write_magnitude(bytes.len())?;
                writer.write_bytes(bytes);
            }
            ConstantValue::Int(number) => writer.write_packed_int(*number),
            ConstantValue::Version(version) => {
                writer.write_magnitude(version.parts().len())?;
                for &part in version.parts() {
                    writer.write_packed_int(i64::from(part));
                }
            }
            ConstantValue::Module { name } => self.write_ref(*name, writer)?,
            ConstantValue::Package { parent, name }
            | ConstantValue::Class { parent, name }
            | ConstantValue::Property { parent, name }
            | ConstantValue::MultiMethod { parent, name } => {
                self.write_ref(*parent, writer)?;
                self.write_ref(*name, writer)?;
            }
            ConstantValue::Method {
                multi_method,
                access,
                params,
                returns,
            } => {
                self.write_ref(*multi_method, writer)?;
                writer.write_u8(*access as u8);
                writer.write_magnitude(params.len())?;
                for &param in params {
                    self.write_ref(param, writer)?;
                }
                writer.write_magnitude(returns.len())?;
                for &ret in returns {
                    self.write_ref(ret, writer)?;
                }
            }
            ConstantValue::ClassType { class, access } => {
                self.write_ref(*class, writer)?;
                writer.write_u8(*access as u8);
            }
            ConstantValue::ConditionNamed { name } => self.write_ref(*name, writer)?,
            ConstantValue::ConditionVersioned { version } => self.write_ref(*version, writer)?,
            ConstantValue::ConditionPresent {
                identity,
                version,
                exact,
            } => {
                self.write_ref(*identity, writer)?;
                match version {
                    Some(version) => self.write_ref(*version, writer)?,
                    None => writer.write_packed_int(-1),
                }
                writer.write_u8(u8::from(*exact));
            }
            ConstantValue::ConditionNot(condition) => self.write_ref(*condition, writer)?,
            ConstantValue::ConditionAll(members) | ConstantValue::ConditionAny(members) => {
                writer.write_magnitude(members.len())?;
                for &member in members {
                    self.write_ref(member, writer)?;
                }
            }
        }
        Ok(())
    }

    fn disassemble_payload(
        &self,
        format: ConstantFormat,
        parser: &mut Parser,
    ) -> Result<ConstantValue> {
        let value = match format {
            ConstantFormat::Byte => ConstantValue::Byte(parser.read_u8()?),
            ConstantFormat::Char => {
                let code = parser.read_magnitude()?;
                let character = char::from_u32(code)
                    .ok_or_else(|| malformed_error!("Invalid code point: {:#x}", code))?;
                ConstantValue::Char(character)
            }
            ConstantFormat::CharString => ConstantValue::CharString(parser.read_prefixed_string()?),
            ConstantFormat::ByteString => {
                let length = parser.read_magnitude()? as usize;
                ConstantValue::ByteString(parser.read_bytes(length)?.to_vec())
            }
            ConstantFormat::Int => ConstantValue::Int(parser.read_packed_int()?),
            ConstantFormat::Version => {
                let count = parser.read_magnitude()? as usize;
                let mut parts = Vec::with_capacity(count);
                for _ in 0..count {
                    parts.push(parser.read_magnitude()?);
                }
                ConstantValue::Version(Version::new(parts).map_err(|_| {
                    malformed_error!("Version constant requires at least one part")
                })?)
            }
            ConstantFormat::Module => ConstantValue::Module {
                name: self.read_ref(parser)?,
            },
            ConstantFormat::Package => ConstantValue::Package {
                parent: self.read_ref(parser)?,
                name: self.read_ref(parser)?,
            },
            ConstantFormat::Class => ConstantValue::Class {
                parent: self.read_ref(parser)?,
                name: self.read_ref(parser)?,
            },
            ConstantFormat::Property => ConstantValue::Property {
                parent: self.read_ref(parser)?,
                name: self.read_ref(parser)?,
            },
            ConstantFormat::MultiMethod => ConstantValue::MultiMethod {
                parent: self.read_ref(parser)?,
                name: self.read_ref(parser)?,
            },
            ConstantFormat::Method => {
                let multi_method = self.read_ref(parser)?;
                let access = read_access(parser)?;
                let param_count = parser.read_magnitude()? as usize;
                let mut params = Vec::with_capacity(param_count);
                for _ in 0..param_count {
                    params.push(self.read_ref(parser)?);
                }
                let return_count = parser.read_magnitude()? as usize;
                let mut returns = Vec::with_capacity(return_count);
                for _ in 0..return_count {
                    returns.push(self.read_ref(parser)?);
                }
                ConstantValue::Method {
                    multi_method,
                    access,
                    params,
                    returns,
                }
            }
            ConstantFormat::ClassType => ConstantValue::ClassType {
                class: self.read_ref(parser)?,
                access: read_access(parser)?,
            },
            ConstantFormat::ConditionNamed => ConstantValue::ConditionNamed {
                name: self.read_ref(parser)?,
            },
            ConstantFormat::ConditionVersioned => ConstantValue::ConditionVersioned {
                version: self.read_ref(parser)?,
            },
            ConstantFormat::ConditionPresent => {
                let identity = self.read_ref(parser)?;
                let version = self.read_opt_ref(parser)?;
                let exact = parser.read_u8()? != 0;
                ConstantValue::ConditionPresent {
                    identity,
                    version,
                    exact,
                }
            }
            ConstantFormat::ConditionNot => ConstantValue::ConditionNot(self.read_ref(parser)?),
            ConstantFormat::ConditionAll | ConstantFormat::ConditionAny => {
                let count = parser.read_magnitude()? as usize;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    members.push(self.read_ref(parser)?);
                }
                if format == ConstantFormat::ConditionAll {
                    ConstantValue::ConditionAll(members)
                } else {
                    ConstantValue::ConditionAny(members)
                }
            }
        };
        Ok(value)
    }

    /// Validate every cross-reference loaded by [`ConstantPool::disassemble`]: indices
    /// must be in range and refer to constants of a format the referring payload accepts.
    fn resolve_references(&self) -> Result<()> {
        let count = self.slots.len() as u32;
        for slot in self.slots.iter().flatten() {
            for referenced in slot.value.referenced() {
                if referenced.slot >= count {
                    return Err(malformed_error!(
                        "Constant cross-reference {} is out of range",
                        referenced.slot
                    ));
                }
            }
            if let Err(message) = self.check_wellformed(&slot.value) {
                return Err(malformed_error!("{}", message));
            }
        }
        Ok(())
    }

    /// Check the format compatibility of a payload's cross-references, returning a message
    /// describing the first violation.
    fn check_wellformed(&self, value: &ConstantValue) -> std::result::Result<(), String> {
        match value {
            ConstantValue::Byte(_)
            | ConstantValue::Char(_)
            | ConstantValue::CharString(_)
            | ConstantValue::ByteString(_)
            | ConstantValue::Int(_)
            | ConstantValue::Version(_) => Ok(()),
            ConstantValue::Module { name } => {
                self.expect_format(*name, |f| f == ConstantFormat::CharString, "a CharString")
            }
            ConstantValue::Package { parent, name } => {
                self.expect_format(
                    *parent,
                    |f| matches!(f, ConstantFormat::Module | ConstantFormat::Package),
                    "a Module or Package",
                )?;
                self.expect_format(*name, |f| f == ConstantFormat::CharString, "a CharString")
            }
            ConstantValue::Class { parent, name } | ConstantValue::Property { parent, name } => {
                self.expect_format(
                    *parent,
                    |f| {
                        matches!(
                            f,
                            ConstantFormat::Module
                                | ConstantFormat::Package
                                | ConstantFormat::Class
                                | ConstantFormat::Method
                        )
                    },
                    "a Module, Package, Class, or Method",
                )?;
                self.expect_format(*name, |f| f == ConstantFormat::CharString, "a CharString")
            }
            ConstantValue::MultiMethod { parent, name } => {
                self.expect_format(
                    *parent,
                    |f| {
                        matches!(
                            f,
                            ConstantFormat::Module
                                | ConstantFormat::Package
                                | ConstantFormat::Class
                                | ConstantFormat::Property
                                | ConstantFormat::Method
                        )
                    },
                    "a Module, Package, Class, Property, or Method",
                )?;
                self.expect_format(*name, |f| f == ConstantFormat::CharString, "a CharString")
            }
            ConstantValue::Method {
                multi_method,
                params,
                returns,
                ..
            } => {
                self.expect_format(
                    *multi_method,
                    |f| f == ConstantFormat::MultiMethod,
                    "a MultiMethod",
                )?;
                for &type_constant in params.iter().chain(returns) {
                    self.expect_format(type_constant, |f| f == ConstantFormat::ClassType, "a type")?;
                }
                Ok(())
            }
            ConstantValue::ClassType { class, .. } => self.expect_format(
                *class,
                |f| {
                    matches!(
                        f,
                        ConstantFormat::Module | ConstantFormat::Package | ConstantFormat::Class
                    )
                },
                "a Module, Package, or Class",
            ),
            ConstantValue::ConditionNamed { name } => {
                self.expect_format(*name, |f| f == ConstantFormat::CharString, "a CharString")
            }
            ConstantValue::ConditionVersioned { version } => {
                self.expect_format(*version, |f| f == ConstantFormat::Version, "a Version")
            }
            ConstantValue::ConditionPresent {
                identity, version, ..
            } => {
                self.expect_format(*identity, |f| f.is_identity(), "an identity")?;
                match version {
                    Some(version) => {
                        self.expect_format(*version, |f| f == ConstantFormat::Version, "a Version")
                    }
                    None => Ok(()),
                }
            }
            ConstantValue::ConditionNot(condition) => {
                self.expect_format(*condition, |f| f.is_condition(), "a condition")
            }
            ConstantValue::ConditionAll(members) | ConstantValue::ConditionAny(members) => {
                if members.len() < 2 {
                    return Err("condition composition requires at least 2 members".to_string());
                }
                for &member in members {
                    self.expect_format(member, |f| f.is_condition(), "a condition")?;
                }
                Ok(())
            }
        }
    }

    fn expect_format(
        &self,
        constant: ConstantRef,
        ok: impl Fn(ConstantFormat) -> bool,
        wanted: &str,
    ) -> std::result::Result<(), String> {
        match self.format_of(constant) {
            Ok(format) if ok(format) => Ok(()),
            Ok(format) => Err(format!("expected {wanted}, found {format:?}")),
            Err(_) => Err("dangling constant cross-reference".to_string()),
        }
    }

    fn write_ref(&self, constant: ConstantRef, writer: &mut Writer) -> Result<()> {
        writer.write_packed_int(i64::from(self.position_of(constant)?));
        Ok(())
    }

    fn read_ref(&self, parser: &mut Parser) -> Result<ConstantRef> {
        let position = parser.read_magnitude()?;
        Ok(ConstantRef {
            pool: self.id,
            slot: position,
        })
    }

    fn read_opt_ref(&self, parser: &mut Parser) -> Result<Option<ConstantRef>> {
        let index = parser.read_packed_int()?;
        if index == -1 {
            return Ok(None);
        }
        let position =
            u32::try_from(index).map_err(|_| malformed_error!("Invalid constant index {}", index))?;
        Ok(Some(ConstantRef {
            pool: self.id,
            slot: position,
        }))
    }

    // ----- internal ------------------------------------------------------------------------

    fn handle(&self, slot: u32) -> ConstantRef {
        ConstantRef {
            pool: self.id,
            slot,
        }
    }

    fn check_handle(&self, constant: ConstantRef) -> Result<()> {
        if constant.pool != self.id {
            return Err(Error::CrossPool);
        }
        match self.slots.get(constant.slot as usize) {
            Some(Some(_)) => Ok(()),
            _ => Err(Error::Structure(
                "constant handle refers to a discarded constant".to_string(),
            )),
        }
    }

    fn check_identity(&self, constant: ConstantRef) -> Result<()> {
        let format = self.format_of(constant)?;
        if !format.is_identity() {
            return Err(Error::InvalidArgument(format!(
                "constant {format:?} is not an identity"
            )));
        }
        Ok(())
    }

    fn check_condition(&self, constant: ConstantRef) -> Result<()> {
        let format = self.format_of(constant)?;
        if !format.is_condition() {
            return Err(Error::InvalidArgument(format!(
                "constant {format:?} is not a condition"
            )));
        }
        Ok(())
    }

    fn slot_ref(&self, slot: u32) -> Result<&Constant> {
        match self.slots.get(slot as usize) {
            Some(Some(constant)) => Ok(constant),
            _ => Err(Error::Structure(format!("invalid constant slot {slot}"))),
        }
    }

    fn slot_mut(&mut self, slot: u32) -> Result<&mut Constant> {
        match self.slots.get_mut(slot as usize) {
            Some(Some(constant)) => Ok(constant),
            _ => Err(Error::Structure(format!("invalid constant slot {slot}"))),
        }
    }

    fn find_by_locator(&mut self, locator: &Locator) -> Option<ConstantRef> {
        self.ensure_lookup();
        self.by_locator.get(locator).map(|&slot| self.handle(slot))
    }

    /// Rebuild the lookup indices from the live constants if they were invalidated.
    fn ensure_lookup(&mut self) {
        if self.lookup_valid {
            return;
        }

        self.by_value.clear();
        self.by_locator.clear();
        for &slot in &self.order.clone() {
            let Ok(constant) = self.slot_ref(slot) else {
                continue;
            };
            let value = constant.value.clone();
            if let Some(locator) = self.locator_of(&value) {
                self.by_locator.insert(locator, slot);
            }
            self.by_value.insert(value, slot);
        }
        self.lookup_valid = true;
    }

    fn locator_of(&self, value: &ConstantValue) -> Option<Locator> {
        match value {
            ConstantValue::Byte(byte) => Some(Locator::Byte(*byte)),
            ConstantValue::Char(character) if (*character as u32) <= 0x7F => {
                Some(Locator::Char(*character))
            }
            ConstantValue::CharString(text) => Some(Locator::CharString(text.clone())),
            ConstantValue::Int(number) => Some(Locator::Int(*number)),
            ConstantValue::Version(version) => Some(Locator::Version(version.to_string())),
            ConstantValue::Module { name } => self
                .string_value(*name)
                .ok()
                .map(|text| Locator::Module(text.to_string())),
            ConstantValue::ConditionNamed { name } => self
                .string_value(*name)
                .ok()
                .map(|text| Locator::NamedCondition(text.to_string())),
            ConstantValue::ClassType {
                class,
                access: Access::Public,
            } => Some(Locator::ClassType(*class)),
            _ => None,
        }
    }
}

fn pool_count(parser: &mut Parser) -> Result<u32> {
    parser.read_magnitude()
}

fn read_access(parser: &mut Parser) -> Result<Access> {
    let raw = parser.read_u8()?;
    Access::from_repr(raw).ok_or_else(|| malformed_error!("Invalid access value: {}", raw))
}

/// A legal identifier: a letter or underscore followed by letters, digits, or underscores.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A legal qualified module name: one or more identifiers joined by dots, for example
/// `app` or `collections.acme.io`.
fn is_valid_qualified_module(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_valid_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut pool = ConstantPool::new();
        let first = pool.register(ConstantValue::CharString("foo".to_string())).unwrap();
        let second = pool.register(ConstantValue::CharString("foo".to_string())).unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.constant(0).unwrap(), Some(first));
    }

    #[test]
    fn registration_scenario() {
        let mut pool = ConstantPool::new();
        let foo = pool.ensure_string("foo").unwrap();
        let _int = pool.ensure_int(42).unwrap();
        let _module = pool.ensure_module("acme").unwrap();

        // "acme" adds its name string, so the pool holds: "foo", 42, "acme", module
        let again = pool.ensure_string("foo").unwrap();
        assert_eq!(again, foo);
        assert_eq!(pool.constant(0).unwrap(), Some(foo));
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn constant_sentinel_and_bounds() {
        let mut pool = ConstantPool::new();
        pool.ensure_byte(7).unwrap();

        assert_eq!(pool.constant(-1).unwrap(), None);
        assert!(pool.constant(0).unwrap().is_some());
        assert!(matches!(pool.constant(1), Err(Error::OutOfBounds)));
        assert!(matches!(pool.constant(-2), Err(Error::OutOfBounds)));
    }

    #[test]
    fn cross_pool_rejected() {
        let mut pool_a = ConstantPool::new();
        let mut pool_b = ConstantPool::new();

        let foreign = pool_a.ensure_string("name").unwrap();
        let result = pool_b.register(ConstantValue::Module { name: foreign });
        assert!(matches!(result, Err(Error::CrossPool)));
        assert!(matches!(pool_b.value(foreign), Err(Error::CrossPool)));
    }

    #[test]
    fn module_name_validation() {
        let mut pool = ConstantPool::new();
        assert!(pool.ensure_module("app.acme.io").is_ok());
        assert!(matches!(
            pool.ensure_module("3bad"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.ensure_module("a..b"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(pool.ensure_module(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn package_requires_module_or_package_parent() {
        let mut pool = ConstantPool::new();
        let module = pool.ensure_module("app").unwrap();
        let package = pool.ensure_package(module, "util").unwrap();
        assert!(pool.ensure_package(package, "inner").is_ok());

        let class = pool.ensure_class(package, "List").unwrap();
        assert!(matches!(
            pool.ensure_package(class, "bad"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn method_builds_multi_method() {
        let mut pool = ConstantPool::new();
        let module = pool.ensure_module("app").unwrap();
        let class = pool.ensure_class(module, "Point").unwrap();
        let int_type = {
            let int_class = pool.ensure_class(module, "Int").unwrap();
            pool.ensure_class_type(int_class, Access::Public).unwrap()
        };

        let method = pool
            .ensure_method(class, "translate", Access::Public, &[int_type, int_type], &[])
            .unwrap();
        assert_eq!(pool.format_of(method).unwrap(), ConstantFormat::Method);
        assert_eq!(pool.name_of(method).unwrap(), "translate");

        // the multi-method identity was interned alongside
        let multi = pool.ensure_multi_method(class, "translate").unwrap();
        match pool.value(method).unwrap() {
            ConstantValue::Method { multi_method, .. } => assert_eq!(*multi_method, multi),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn locator_shortcuts_reuse_instances() {
        let mut pool = ConstantPool::new();
        let a = pool.ensure_int(123).unwrap();
        let b = pool.ensure_int(123).unwrap();
        assert_eq!(a, b);

        let v1 = pool.ensure_version(&"1.2".parse().unwrap()).unwrap();
        let v2 = pool.ensure_version(&"1.2".parse().unwrap()).unwrap();
        assert_eq!(v1, v2);

        let named1 = pool.ensure_named_condition("debug").unwrap();
        let named2 = pool.ensure_named_condition("debug").unwrap();
        assert_eq!(named1, named2);
    }

    #[test]
    fn condition_composition_validation() {
        let mut pool = ConstantPool::new();
        let debug = pool.ensure_named_condition("debug").unwrap();
        let test = pool.ensure_named_condition("test").unwrap();
        let number = pool.ensure_int(1).unwrap();

        assert!(pool.ensure_all_condition(&[debug, test]).is_ok());
        assert!(matches!(
            pool.ensure_all_condition(&[debug]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.ensure_any_condition(&[debug, number]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.ensure_not_condition(number),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn condition_evaluation() {
        use crate::assembly::context::StaticLinkerContext;

        let mut pool = ConstantPool::new();
        let debug = pool.ensure_named_condition("debug").unwrap();
        let test = pool.ensure_named_condition("test").unwrap();
        let both = pool.ensure_all_condition(&[debug, test]).unwrap();
        let either = pool.ensure_any_condition(&[debug, test]).unwrap();
        let not_debug = pool.ensure_not_condition(debug).unwrap();

        let ctx = StaticLinkerContext::new().specify("debug");
        assert!(pool.evaluate_condition(debug, &ctx).unwrap());
        assert!(!pool.evaluate_condition(test, &ctx).unwrap());
        assert!(!pool.evaluate_condition(both, &ctx).unwrap());
        assert!(pool.evaluate_condition(either, &ctx).unwrap());
        assert!(!pool.evaluate_condition(not_debug, &ctx).unwrap());
    }

    #[test]
    fn optimize_discards_unused_and_sorts_by_usage() {
        let mut pool = ConstantPool::new();
        let unused = pool.ensure_string("unused").unwrap();
        let rare = pool.ensure_string("rare").unwrap();
        let hot = pool.ensure_string("hot").unwrap();

        pool.pre_register_all().unwrap();
        pool.register_ref(rare).unwrap();
        for _ in 0..3 {
            pool.register_ref(hot).unwrap();
        }
        pool.post_register_all(true).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.position_of(hot).unwrap(), 0);
        assert_eq!(pool.position_of(rare).unwrap(), 1);
        assert!(matches!(pool.value(unused), Err(Error::Structure(_))));

        // handles stay valid, positions changed, lookups rebuilt lazily
        assert_eq!(pool.ensure_string("hot").unwrap(), hot);
        assert_eq!(pool.ensure_string("rare").unwrap(), rare);
    }

    #[test]
    fn optimize_counts_dependencies_of_first_use() {
        let mut pool = ConstantPool::new();
        let module = pool.ensure_module("app").unwrap();
        let name = match pool.value(module).unwrap() {
            ConstantValue::Module { name } => *name,
            other => panic!("unexpected value: {other:?}"),
        };

        pool.pre_register_all().unwrap();
        pool.register_ref(module).unwrap();
        pool.post_register_all(true).unwrap();

        // the name string survives because the module's first use counted it
        assert_eq!(pool.len(), 2);
        assert!(pool.position_of(name).is_ok());
    }

    #[test]
    fn pre_register_bracket_misuse() {
        let mut pool = ConstantPool::new();
        pool.pre_register_all().unwrap();
        assert!(matches!(pool.pre_register_all(), Err(Error::Structure(_))));
        pool.post_register_all(false).unwrap();
        assert!(matches!(
            pool.post_register_all(false),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn assemble_disassemble_roundtrip() {
        let mut pool = ConstantPool::new();
        let module = pool.ensure_module("app.acme.io").unwrap();
        let package = pool.ensure_package(module, "util").unwrap();
        let class = pool.ensure_class(package, "List").unwrap();
        let class_type = pool.ensure_class_type(class, Access::Public).unwrap();
        pool.ensure_method(class, "size", Access::Public, &[], &[class_type])
            .unwrap();
        pool.ensure_byte(0xFF).unwrap();
        pool.ensure_char('λ').unwrap();
        pool.ensure_byte_string(&[1, 2, 3]).unwrap();
        pool.ensure_int(-7).unwrap();
        let ver = "1.2.3".parse().unwrap();
        let versioned = pool.ensure_versioned_condition(&ver).unwrap();
        let named = pool.ensure_named_condition("debug").unwrap();
        let both = pool.ensure_all_condition(&[versioned, named]).unwrap();
        pool.ensure_not_condition(both).unwrap();
        pool.ensure_present_version_condition(package, &ver, true).unwrap();

        let mut writer = Writer::new();
        pool.assemble(&mut writer).unwrap();
        let bytes = writer.into_bytes();

        let mut parser = Parser::new(&bytes);
        let loaded = ConstantPool::disassemble(&mut parser).unwrap();
        assert!(!parser.has_more_data());
        assert_eq!(loaded.len(), pool.len());

        for position in 0..pool.len() as i64 {
            let a = pool.constant(position).unwrap().unwrap();
            let b = loaded.constant(position).unwrap().unwrap();
            assert!(pool.deep_eq(a, &loaded, b), "mismatch at position {position}");
        }
    }

    #[test]
    fn disassemble_rejects_bad_input() {
        // unknown format tag
        let mut parser = Parser::new(&[0x01, 0xCC]);
        assert!(matches!(
            ConstantPool::disassemble(&mut parser),
            Err(Error::Malformed { .. })
        ));

        // truncated stream
        let mut parser = Parser::new(&[0x02, 0x00]);
        assert!(matches!(
            ConstantPool::disassemble(&mut parser),
            Err(Error::OutOfBounds)
        ));

        // module whose name reference is out of range
        let mut writer = Writer::new();
        writer.write_magnitude(1).unwrap();
        writer.write_u8(ConstantFormat::Module as u8);
        writer.write_packed_int(9);
        let bytes = writer.into_bytes();
        let mut parser = Parser::new(&bytes);
        assert!(matches!(
            ConstantPool::disassemble(&mut parser),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn deep_eq_across_pools() {
        let mut pool_a = ConstantPool::new();
        let mut pool_b = ConstantPool::new();

        let module_a = pool_a.ensure_module("app").unwrap();
        let package_a = pool_a.ensure_package(module_a, "util").unwrap();

        // register in a different order so slots differ
        pool_b.ensure_int(99).unwrap();
        let module_b = pool_b.ensure_module("app").unwrap();
        let package_b = pool_b.ensure_package(module_b, "util").unwrap();

        assert!(pool_a.deep_eq(package_a, &pool_b, package_b));
        assert!(!pool_a.deep_eq(module_a, &pool_b, package_b));
    }
}
