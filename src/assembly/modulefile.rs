//! The file-level container binding a constant pool to a component tree.
//!
//! A [`ModuleFile`] owns the [`ConstantPool`] and [`ComponentTree`] of one compilation
//! unit, carries the active linker context used for conditional child resolution, and
//! orchestrates the serialization ordering: the usage-counting registration bracket, the
//! optional pool optimization, and the final assembly of the pool section followed by the
//! component tree.
//!
//! # On-disk layout
//!
//! ```text
//! [magic "MFLD"] [format version byte] [pool section] [component tree child block]
//! ```
//!
//! The component tree is written as the file root's child block, which holds exactly one
//! key: the module (or its conditional sibling chain).

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::assembly::component::{ComponentFormat, ComponentId, ComponentTree};
use crate::assembly::composite::Resolved;
use crate::assembly::constant::ConstantRef;
use crate::assembly::context::LinkerContext;
use crate::assembly::pool::ConstantPool;
use crate::file::parser::Parser;
use crate::file::writer::Writer;
use crate::{Error, Result};

/// The four magic bytes opening every module file.
pub const MAGIC: [u8; 4] = *b"MFLD";

/// The format version this implementation reads and writes.
pub const FORMAT_VERSION: u8 = 1;

/// One module file: a constant pool, a component tree, and the context they are linked
/// under.
///
/// # Examples
///
/// ```rust
/// use manifold::{Access, ComponentFormat, ModuleFile};
///
/// let mut file = ModuleFile::new("app.acme.io")?;
/// let module = file.module();
///
/// let (tree, pool) = file.parts_mut();
/// tree.create_package(pool, module, Access::Public, "util")?;
///
/// let bytes = file.to_bytes(true)?;
/// let reloaded = ModuleFile::from_bytes(&bytes, false)?;
/// assert_eq!(reloaded.module_name()?, "app.acme.io");
/// # Ok::<(), manifold::Error>(())
/// ```
pub struct ModuleFile {
    pool: ConstantPool,
    tree: ComponentTree,
    file: ComponentId,
    module: ComponentId,
    context: Option<Box<dyn LinkerContext>>,
}

impl ModuleFile {
    /// Create a new module file containing an empty module with the given qualified name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an illegal qualified module name.
    pub fn new(module_name: &str) -> Result<Self> {
        let mut pool = ConstantPool::new();
        let mut tree = ComponentTree::new();
        let file = tree.new_file();
        let module = tree.new_module(&mut pool, file, module_name)?;

        Ok(ModuleFile {
            pool,
            tree,
            file,
            module,
            context: None,
        })
    }

    /// The eldest sibling of the module this file contains.
    #[must_use]
    pub fn module(&self) -> ComponentId {
        self.module
    }

    /// The file-level root component.
    #[must_use]
    pub fn root(&self) -> ComponentId {
        self.file
    }

    /// The qualified name of the contained module.
    ///
    /// # Errors
    /// Propagates identity-resolution failures.
    pub fn module_name(&self) -> Result<&str> {
        self.tree.name(&self.pool, self.module)
    }

    /// The constant pool owned by this file.
    #[must_use]
    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    /// The component tree owned by this file.
    #[must_use]
    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    /// Mutable access to the tree and the pool together, which is what every creation
    /// operation needs.
    pub fn parts_mut(&mut self) -> (&mut ComponentTree, &mut ConstantPool) {
        (&mut self.tree, &mut self.pool)
    }

    /// Install the linker context used by [`ModuleFile::child`] and
    /// [`ModuleFile::resolve_parent`]. `None` disables condition filtering.
    pub fn set_context(&mut self, context: Option<Box<dyn LinkerContext>>) {
        self.context = context;
    }

    /// The active linker context, if one is installed.
    #[must_use]
    pub fn context(&self) -> Option<&dyn LinkerContext> {
        self.context.as_deref()
    }

    /// Resolve a child by name under the active context.
    ///
    /// # Errors
    /// Propagates lookup failures.
    pub fn child(&mut self, parent: ComponentId, name: &str) -> Result<Option<Resolved>> {
        self.tree
            .child_by_name(&self.pool, parent, name, self.context.as_deref())
    }

    /// Resolve a child by identity under the active context.
    ///
    /// # Errors
    /// Propagates lookup failures.
    pub fn child_by_identity(
        &mut self,
        parent: ComponentId,
        identity: ConstantRef,
    ) -> Result<Option<Resolved>> {
        self.tree
            .child_by_identity(&self.pool, parent, identity, self.context.as_deref())
    }

    /// Resolve the parent of a component under the active context.
    ///
    /// # Errors
    /// Propagates lookup failures.
    pub fn resolve_parent(&mut self, id: ComponentId) -> Result<Option<Resolved>> {
        self.tree
            .resolve_parent(&self.pool, id, self.context.as_deref())
    }

    /// Merge the version labels of another file's module into this one.
    ///
    /// Labels already present here are left alone.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structure`] if this module carries no version label, and
    /// [`crate::Error::InvalidArgument`] if the other module has a different identity or
    /// carries no version label.
    pub fn merge_versions(&mut self, other: &ModuleFile) -> Result<()> {
        if !self.tree.is_versioned(self.module)? {
            return Err(Error::Structure(format!(
                "first module ({}) does not contain a version label",
                self.module_name()?
            )));
        }
        if self.module_name()? != other.module_name()? {
            return Err(Error::InvalidArgument(format!(
                "second module ({}) does not match the first module ({})",
                other.module_name()?,
                self.module_name()?
            )));
        }
        if !other.tree.is_versioned(other.module)? {
            return Err(Error::InvalidArgument(format!(
                "second module ({}) does not contain a version label",
                other.module_name()?
            )));
        }

        for version in other.tree.module_versions(&other.pool, other.module)? {
            self.tree.add_version(&mut self.pool, self.module, &version)?;
        }
        Ok(())
    }

    /// Compare two module files by value: bodies and full child maps, recursively,
    /// sibling chains included. Deferred subtrees on either side are realized first.
    ///
    /// # Errors
    /// Propagates deferred-load failures.
    pub fn deep_equals(&mut self, other: &mut ModuleFile) -> Result<bool> {
        let file_a = self.file;
        let file_b = other.file;
        self.tree
            .deep_eq(&self.pool, file_a, &mut other.tree, &other.pool, file_b)
    }

    /// Serialize this file: registration bracket, optional pool optimization, then the
    /// header, the pool section, and the component tree.
    ///
    /// This is the one required ordering: usage counts feed the optimization, and the
    /// optimization fixes the positions that the tree assembly writes.
    ///
    /// # Errors
    /// Propagates registration and assembly failures.
    pub fn to_bytes(&mut self, optimize: bool) -> Result<Vec<u8>> {
        let file = self.file;
        self.pool.pre_register_all()?;
        self.tree.register_children_constants(&mut self.pool, file)?;
        self.pool.post_register_all(optimize)?;

        let mut writer = Writer::new();
        writer.write_bytes(&MAGIC);
        writer.write_u8(FORMAT_VERSION);
        self.pool.assemble(&mut writer)?;
        self.tree.assemble_children(&self.pool, file, &mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Deserialize a module file from bytes.
    ///
    /// With `lazy` set, nested child blocks are kept as raw bytes per sibling group and
    /// parsed only on first access.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::Malformed`] for a
    /// bad header or inconsistent structure, and [`crate::Error::OutOfBounds`] for a
    /// truncated stream.
    pub fn from_bytes(data: &[u8], lazy: bool) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_bytes(4)?;
        if magic != MAGIC {
            return Err(malformed_error!("Not a module file: bad magic"));
        }
        let version = parser.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(malformed_error!(
                "Unsupported module format version: {}",
                version
            ));
        }

        let pool = ConstantPool::disassemble(&mut parser)?;
        let mut tree = ComponentTree::new();
        let file = tree.new_file();
        tree.disassemble_children(&pool, file, &mut parser, lazy)?;
        if parser.has_more_data() {
            return Err(malformed_error!("Trailing bytes after component tree"));
        }

        let roots = tree.children(&pool, file, None)?;
        if roots.len() != 1 {
            return Err(malformed_error!(
                "Module file must contain exactly one module, found {}",
                roots.len()
            ));
        }
        let module = roots[0].components()[0];
        if tree.format(module)? != ComponentFormat::Module {
            return Err(malformed_error!("Root component is not a module"));
        }

        tree.reset_all_modified();
        Ok(ModuleFile {
            pool,
            tree,
            file,
            module,
            context: None,
        })
    }

    /// Deserialize a module file from disk, memory-mapped, with lazy children.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] for I/O failures and the conditions of
    /// [`ModuleFile::from_bytes`] for format failures.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::Empty);
        }

        let mmap = unsafe { Mmap::map(&file)? };
        ModuleFile::from_bytes(&mmap, true)
    }

    /// Serialize this file to disk.
    ///
    /// # Errors
    /// Propagates [`ModuleFile::to_bytes`] failures and filesystem errors.
    pub fn write_to_file(&mut self, path: &Path, optimize: bool) -> Result<()> {
        let bytes = self.to_bytes(optimize)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_checked() {
        assert!(matches!(ModuleFile::from_bytes(&[], false), Err(Error::Empty)));
        assert!(matches!(
            ModuleFile::from_bytes(b"MF", false),
            Err(Error::OutOfBounds)
        ));
        assert!(matches!(
            ModuleFile::from_bytes(b"ELF\x01\x01\x00", false),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            ModuleFile::from_bytes(b"MFLD\x63\x00\x00", false),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut file = ModuleFile::new("app").unwrap();
        let mut bytes = file.to_bytes(true).unwrap();
        bytes.push(0xAB);
        assert!(matches!(
            ModuleFile::from_bytes(&bytes, false),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn empty_module_roundtrip() {
        let mut file = ModuleFile::new("app.acme.io").unwrap();
        let bytes = file.to_bytes(true).unwrap();

        let mut reloaded = ModuleFile::from_bytes(&bytes, false).unwrap();
        assert_eq!(reloaded.module_name().unwrap(), "app.acme.io");
        assert!(file.deep_equals(&mut reloaded).unwrap());
    }

    #[test]
    fn merge_versions_contract() {
        let mut first = ModuleFile::new("app").unwrap();
        let mut second = ModuleFile::new("app").unwrap();
        let mut stranger = ModuleFile::new("other").unwrap();

        // the receiving module must be versioned
        assert!(matches!(
            first.merge_versions(&second),
            Err(Error::Structure(_))
        ));

        let module = first.module();
        let (tree, pool) = first.parts_mut();
        tree.label_version(pool, module, &"1".parse().unwrap()).unwrap();

        // so must the donor
        assert!(matches!(
            first.merge_versions(&second),
            Err(Error::InvalidArgument(_))
        ));

        let module = second.module();
        let (tree, pool) = second.parts_mut();
        tree.label_version(pool, module, &"2".parse().unwrap()).unwrap();

        let module = stranger.module();
        let (tree, pool) = stranger.parts_mut();
        tree.label_version(pool, module, &"9".parse().unwrap()).unwrap();

        // identities must match
        assert!(matches!(
            first.merge_versions(&stranger),
            Err(Error::InvalidArgument(_))
        ));

        first.merge_versions(&second).unwrap();
        let versions = first
            .tree()
            .module_versions(first.pool(), first.module())
            .unwrap();
        assert_eq!(versions, vec!["1".parse().unwrap(), "2".parse().unwrap()]);
    }
}
