//! End-to-end launch tests: build an archive, open it, run its entry unit

use caplet_rs::{
    ArchiveBuilder, ArchivePlan, CapletError, Launcher, OperationDef, OperationRegistry,
    ParamKind, ReturnKind, UnitDefinition,
};
use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

fn unit(name: &str, module: Option<&str>, operations: &[(&str, ParamKind, ReturnKind)]) -> UnitDefinition {
    UnitDefinition {
        name: name.to_string(),
        module: module.map(String::from),
        operations: operations
            .iter()
            .map(|(op, params, returns)| OperationDef {
                name: op.to_string(),
                params: *params,
                returns: *returns,
            })
            .collect(),
    }
}

fn main_unit(name: &str, module: Option<&str>) -> UnitDefinition {
    unit(name, module, &[("main", ParamKind::Args, ReturnKind::Void)])
}

/// Write a dependency archive holding the given unit definitions
fn write_dep_archive(dir: &Path, file_name: &str, units: &[UnitDefinition]) -> PathBuf {
    let path = dir.join(file_name);
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for definition in units {
        writer
            .start_file(UnitDefinition::entry_path(&definition.name), options)
            .unwrap();
        writer.write_all(&definition.to_json().unwrap()).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn build_archive(dir: &Path, entry_unit: &str, deps: &[&Path]) -> PathBuf {
    let mut plan = ArchivePlan::new();
    for dep in deps {
        plan.add_library(dep).unwrap();
    }
    let out = dir.join("bundle.arc");
    ArchiveBuilder::new(&out)
        .entry_unit(entry_unit)
        .build(&plan)
        .unwrap();
    out
}

#[test]
fn test_end_to_end_launch_with_args() {
    let dir = tempfile::tempdir().unwrap();
    let dep1 = write_dep_archive(dir.path(), "dep1.arc", &[main_unit("main.Program", None)]);
    let dep2 = write_dep_archive(dir.path(), "dep2.arc", &[main_unit("util.Helper", None)]);
    let bundle = build_archive(dir.path(), "main.Program", &[&dep1, &dep2]);

    let launcher = Launcher::open(&bundle).unwrap();
    assert_eq!(launcher.manifest().entry_unit.as_deref(), Some("main.Program"));
    assert_eq!(launcher.roots().len(), 2);
    assert!(launcher.manifest().digest_of("LIB/dep1.arc").is_some());
    assert!(launcher.manifest().digest_of("LIB/dep2.arc").is_some());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut registry = OperationRegistry::new();
    registry.register("main.Program", "main", move |args| {
        sink.borrow_mut().extend(args.iter().cloned());
        Ok(())
    });

    let args = vec!["--flag".to_string()];
    launcher.launch(&registry, &args).unwrap();
    assert_eq!(*seen.borrow(), args);
}

#[test]
fn test_first_root_shadows_second() {
    let dir = tempfile::tempdir().unwrap();
    let dep1 = write_dep_archive(dir.path(), "dep1.arc", &[main_unit("app.Tool", Some("first"))]);
    let dep2 = write_dep_archive(dir.path(), "dep2.arc", &[main_unit("app.Tool", Some("second"))]);

    let bundle = build_archive(dir.path(), "app.Tool", &[&dep1, &dep2]);
    let launcher = Launcher::open(&bundle).unwrap();
    let resolved = launcher.loader().load_unit("app.Tool").unwrap();
    assert_eq!(resolved.module.as_deref(), Some("first"));

    // Removing the first copy lets resolution fall through to the second
    let bundle = build_archive(dir.path(), "app.Tool", &[&dep2]);
    let launcher = Launcher::open(&bundle).unwrap();
    let resolved = launcher.loader().load_unit("app.Tool").unwrap();
    assert_eq!(resolved.module.as_deref(), Some("second"));
}

#[test]
fn test_roots_follow_plan_order() {
    let dir = tempfile::tempdir().unwrap();
    // Names sort against plan order on purpose
    let dep_z = write_dep_archive(dir.path(), "z-first.arc", &[main_unit("a.A", None)]);
    let dep_a = write_dep_archive(dir.path(), "a-second.arc", &[main_unit("b.B", None)]);

    let bundle = build_archive(dir.path(), "a.A", &[&dep_z, &dep_a]);
    let launcher = Launcher::open(&bundle).unwrap();

    let keys: Vec<&str> = launcher.roots().iter().map(|r| r.key()).collect();
    assert!(keys[0].ends_with("!/LIB/z-first.arc"));
    assert!(keys[1].ends_with("!/LIB/a-second.arc"));
}

#[test]
fn test_missing_entry_operation() {
    let dir = tempfile::tempdir().unwrap();
    let dep = write_dep_archive(
        dir.path(),
        "dep.arc",
        &[unit("main.Program", None, &[("setup", ParamKind::Args, ReturnKind::Void)])],
    );
    let bundle = build_archive(dir.path(), "main.Program", &[&dep]);

    let launcher = Launcher::open(&bundle).unwrap();
    let registry = OperationRegistry::new();
    let result = launcher.launch(&registry, &[]);

    assert!(matches!(
        result,
        Err(CapletError::EntryPointNotFound { .. })
    ));
}

#[test]
fn test_invalid_entry_signature() {
    let dir = tempfile::tempdir().unwrap();
    let dep = write_dep_archive(
        dir.path(),
        "dep.arc",
        &[unit("main.Program", None, &[("main", ParamKind::Args, ReturnKind::Value)])],
    );
    let bundle = build_archive(dir.path(), "main.Program", &[&dep]);

    let launcher = Launcher::open(&bundle).unwrap();
    let mut registry = OperationRegistry::new();
    registry.register("main.Program", "main", |_| Ok(()));
    let result = launcher.launch(&registry, &[]);

    assert!(matches!(
        result,
        Err(CapletError::InvalidEntryPointSignature { .. })
    ));
}

#[test]
fn test_application_error_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let dep = write_dep_archive(dir.path(), "dep.arc", &[main_unit("main.Program", None)]);
    let bundle = build_archive(dir.path(), "main.Program", &[&dep]);

    let launcher = Launcher::open(&bundle).unwrap();
    let mut registry = OperationRegistry::new();
    registry.register("main.Program", "main", |_| Err("application failure".into()));

    match launcher.launch(&registry, &[]) {
        Err(CapletError::Application(e)) => assert_eq!(e.to_string(), "application failure"),
        other => panic!("unexpected result: {:?}", other.err()),
    }
}

#[test]
fn test_archive_without_entry_unit_cannot_launch() {
    let dir = tempfile::tempdir().unwrap();
    let dep = write_dep_archive(dir.path(), "dep.arc", &[main_unit("main.Program", None)]);

    let mut plan = ArchivePlan::new();
    plan.add_library(&dep).unwrap();
    let out = dir.path().join("bundle.arc");
    ArchiveBuilder::new(&out).build(&plan).unwrap();

    let launcher = Launcher::open(&out).unwrap();
    let result = launcher.launch(&OperationRegistry::new(), &[]);
    assert!(matches!(result, Err(CapletError::MissingEntryUnit)));
}

#[test]
fn test_entry_module_restricts_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let dep1 = write_dep_archive(dir.path(), "dep1.arc", &[main_unit("app.Tool", Some("other"))]);
    let dep2 = write_dep_archive(dir.path(), "dep2.arc", &[main_unit("app.Tool", Some("wanted"))]);

    let mut plan = ArchivePlan::new();
    plan.add_library(&dep1).unwrap();
    plan.add_library(&dep2).unwrap();
    let out = dir.path().join("bundle.arc");
    ArchiveBuilder::new(&out)
        .entry_unit("app.Tool")
        .entry_module("wanted")
        .build(&plan)
        .unwrap();

    let launcher = Launcher::open(&out).unwrap();
    let resolved = launcher.loader().load_unit("app.Tool").unwrap();
    assert_eq!(resolved.module.as_deref(), Some("wanted"));
}

#[test]
fn test_load_and_run_over_explicit_roots() {
    let dir = tempfile::tempdir().unwrap();
    let dep = write_dep_archive(dir.path(), "dep.arc", &[main_unit("main.Program", None)]);
    let bundle = build_archive(dir.path(), "main.Program", &[&dep]);

    let launcher = Launcher::open(&bundle).unwrap();
    let roots = launcher.roots().to_vec();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut registry = OperationRegistry::new();
    registry.register("main.Program", "main", move |args| {
        sink.borrow_mut().extend(args.iter().cloned());
        Ok(())
    });

    let args = vec!["one".to_string(), "two".to_string()];
    caplet_rs::load_and_run(roots, &registry, "main.Program", "main", &args).unwrap();
    assert_eq!(*seen.borrow(), args);
}

#[test]
fn test_resources_resolve_through_shadowing_order() {
    let dir = tempfile::tempdir().unwrap();

    // Both dependency archives carry a resource with the same name
    let make_dep = |file_name: &str, content: &[u8]| {
        let path = dir.path().join(file_name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("config/settings.json", options).unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
        path
    };
    let dep1 = make_dep("dep1.arc", b"{\"from\":\"dep1\"}");
    let dep2 = make_dep("dep2.arc", b"{\"from\":\"dep2\"}");

    let mut plan = ArchivePlan::new();
    plan.add_library(&dep1).unwrap();
    plan.add_library(&dep2).unwrap();
    let out = dir.path().join("bundle.arc");
    ArchiveBuilder::new(&out).build(&plan).unwrap();

    let launcher = Launcher::open(&out).unwrap();
    let root = launcher
        .loader()
        .find_resource("config/settings.json")
        .unwrap();
    assert_eq!(root.read("config/settings.json").unwrap(), b"{\"from\":\"dep1\"}");
}
