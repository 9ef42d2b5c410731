//! Conditional resolution and pool optimization, driven through the file container the
//! way a linker would drive them.

use manifold::prelude::*;

fn versioned_pair() -> Result<ModuleFile> {
    let mut file = ModuleFile::new("app")?;
    let module = file.module();
    let (tree, pool) = file.parts_mut();

    let v1 = tree.create_class(pool, module, Access::Public, ComponentFormat::Class, "engine")?;
    let v2 = tree.create_class(pool, module, Access::Public, ComponentFormat::Service, "engine")?;
    let cond_v1 = pool.ensure_versioned_condition(&"1".parse()?)?;
    let cond_v2 = pool.ensure_versioned_condition(&"2".parse()?)?;
    tree.set_condition(v1, Some(cond_v1))?;
    tree.set_condition(v2, Some(cond_v2))?;
    Ok(file)
}

#[test]
fn sibling_consistency_under_contexts() -> Result<()> {
    let mut file = versioned_pair()?;
    let module = file.module();

    // a context where only the 1.x condition holds selects exactly that sibling
    file.set_context(Some(Box::new(
        StaticLinkerContext::new().with_version("1.3".parse()?),
    )));
    let engine = file.child(module, "engine")?.expect("engine");
    let engine = engine.single().expect("unambiguous");
    assert_eq!(file.tree().format(engine)?, ComponentFormat::Class);

    // a context satisfying neither condition selects nothing
    file.set_context(Some(Box::new(
        StaticLinkerContext::new().with_version("3".parse()?),
    )));
    assert!(file.child(module, "engine")?.is_none());

    // no filtering selects both, wrapped in a composite
    file.set_context(None);
    let both = file.child(module, "engine")?.expect("engine");
    assert_eq!(both.components().len(), 2);
    assert!(matches!(
        both.format(file.tree()),
        Err(Error::Structure(_))
    ));
    assert_eq!(both.name(file.tree(), file.pool())?, "engine");
    Ok(())
}

#[test]
fn composite_navigation_collapses_shared_children() -> Result<()> {
    let mut file = versioned_pair()?;
    let module = file.module();

    // structure declared through one variant is shared by the whole chain
    {
        let (tree, pool) = file.parts_mut();
        let chain_head = tree
            .child_by_name(pool, module, "engine", None)?
            .expect("engine")
            .components()[0];
        let module_identity = tree.identity(module)?.expect("identity");
        let int_class = pool.ensure_class(module_identity, "Int")?;
        let int_type = pool.ensure_class_type(int_class, Access::Public)?;
        tree.create_property(pool, chain_head, true, Access::Public, int_type, "threads")?;
    }

    let composite = file.child(module, "engine")?.expect("engine");
    let (tree, pool) = file.parts_mut();
    let threads = composite
        .child_by_name(tree, pool, "threads", None)?
        .expect("threads");
    assert!(threads.single().is_some(), "shared child deduplicates");
    Ok(())
}

#[test]
fn optimize_discards_garbage_and_compacts_positions() -> Result<()> {
    let mut file = versioned_pair()?;
    let module = file.module();

    // litter the pool with constants nothing references
    let (tree, pool) = file.parts_mut();
    let garbage_int = pool.ensure_int(0xDEAD)?;
    let garbage_string = pool.ensure_string("orphan")?;
    let module_identity = tree.identity(module)?.expect("identity");

    file.to_bytes(true)?;
    let pool = file.pool();

    // unreachable constants are gone from the lookups
    assert!(pool.position_of(garbage_int).is_err());
    assert!(pool.position_of(garbage_string).is_err());

    // survivors hold a compact, collision-free position range
    let size = pool.len() as i64;
    for position in 0..size {
        let constant = pool.constant(position)?.expect("live constant");
        assert_eq!(i64::from(pool.position_of(constant)?), position);
    }
    assert!(pool.constant(size).is_err());

    // constants reachable from the live tree are still addressable
    let position = pool.position_of(module_identity)?;
    assert!(i64::from(position) < size);
    Ok(())
}

#[test]
fn registration_bracket_counts_usage_for_ordering() -> Result<()> {
    let mut file = ModuleFile::new("app")?;
    let module = file.module();
    let (tree, pool) = file.parts_mut();

    // one type constant used by many properties, one used by a single property
    let module_identity = tree.identity(module)?.expect("identity");
    let int_class = pool.ensure_class(module_identity, "Int")?;
    let int_type = pool.ensure_class_type(int_class, Access::Public)?;
    let str_class = pool.ensure_class(module_identity, "String")?;
    let str_type = pool.ensure_class_type(str_class, Access::Public)?;

    let holder = tree.create_class(pool, module, Access::Public, ComponentFormat::Class, "H")?;
    for name in ["a", "b", "c", "d"] {
        tree.create_property(pool, holder, false, Access::Public, int_type, name)?;
    }
    tree.create_property(pool, holder, false, Access::Public, str_type, "label")?;

    file.to_bytes(true)?;
    let pool = file.pool();
    assert!(
        pool.position_of(int_type)? < pool.position_of(str_type)?,
        "the more-used type constant sorts first"
    );
    Ok(())
}

#[test]
fn dirty_tracking_survives_group_operations() -> Result<()> {
    let mut file = ModuleFile::new("app")?;
    let module = file.module();
    let (tree, pool) = file.parts_mut();
    let class = tree.create_class(pool, module, Access::Public, ComponentFormat::Class, "C")?;

    tree.reset_modified(class)?;
    tree.set_synthetic(class, true)?;
    assert!(tree.is_modified(class)?);

    // repeating the same value is a no-op
    tree.reset_modified(class)?;
    tree.set_synthetic(class, true)?;
    assert!(!tree.is_modified(class)?);

    tree.set_documentation(class, Some("The C class.".to_string()))?;
    assert!(tree.is_modified(class)?);
    assert_eq!(tree.documentation(class)?, Some("The C class."));
    Ok(())
}
