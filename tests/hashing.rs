use std::error::Error;
use std::path::Path;

use ark::errors::ArkError;
use ark::hash::{TargetHasher, file_hash, hash_dir, short_hash};
use ark::target::Address;
use ark::workspace::Workspace;
use ark_test_utils::builders::write_file;
use ark_test_utils::{WorkspaceBuilder, init_tracing};
use proptest::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn hasher_with(sources: &[(String, String)], deps: &[String]) -> TargetHasher {
    let mut h = TargetHasher::new("local_exec").attributes(&json!({"command": ["make"], "workdir": "."}));
    for (rel, hash) in sources {
        h = h.source_file(rel.clone(), hash.clone());
    }
    for dep in deps {
        h = h.dependency(dep.clone());
    }
    h
}

proptest! {
    #[test]
    fn target_hash_ignores_input_order(
        sources in proptest::collection::btree_map("[a-z]{1,8}(/[a-z]{1,8}){0,2}", "[0-9a-f]{40}", 0..8),
        deps in proptest::collection::vec("[0-9a-f]{64}", 0..5),
        seed in any::<u64>(),
    ) {
        let sources: Vec<(String, String)> = sources.into_iter().collect();
        let mut shuffled_sources = sources.clone();
        let mut shuffled_deps = deps.clone();
        // Deterministic rotation stands in for an arbitrary walk order.
        if !shuffled_sources.is_empty() {
            let k = (seed as usize) % shuffled_sources.len();
            shuffled_sources.rotate_left(k);
            shuffled_sources.reverse();
        }
        if !shuffled_deps.is_empty() {
            let k = (seed as usize) % shuffled_deps.len();
            shuffled_deps.rotate_right(k);
        }

        let a = hasher_with(&sources, &deps).finish().unwrap();
        let b = hasher_with(&shuffled_sources, &shuffled_deps).finish().unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn target_hash_changes_with_any_source_hash(
        sources in proptest::collection::btree_map("[a-z]{1,8}", "[0-9a-f]{40}", 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let sources: Vec<(String, String)> = sources.into_iter().collect();
        let mut mutated = sources.clone();
        let i = pick.index(mutated.len());
        mutated[i].1 = format!("{:0>40}", "1");
        prop_assume!(mutated[i].1 != sources[i].1);

        let a = hasher_with(&sources, &[]).finish().unwrap();
        let b = hasher_with(&mutated, &[]).finish().unwrap();
        prop_assert_ne!(a, b);
    }
}

#[test]
fn attribute_key_order_does_not_matter() -> TestResult {
    let mut first = serde_json::Map::new();
    first.insert("b".into(), json!(1));
    first.insert("a".into(), json!({"y": true, "x": [1, 2]}));
    let mut second = serde_json::Map::new();
    second.insert("a".into(), json!({"x": [1, 2], "y": true}));
    second.insert("b".into(), json!(1));

    let a = TargetHasher::new("k").attributes(&first.into()).finish()?;
    let b = TargetHasher::new("k").attributes(&second.into()).finish()?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn attribute_and_dependency_changes_change_the_hash() -> TestResult {
    let base = TargetHasher::new("k").attributes(&json!({"v": 1})).dependency("d1").finish()?;
    let attr = TargetHasher::new("k").attributes(&json!({"v": 2})).dependency("d1").finish()?;
    let dep = TargetHasher::new("k").attributes(&json!({"v": 1})).dependency("d2").finish()?;
    let kind = TargetHasher::new("other").attributes(&json!({"v": 1})).dependency("d1").finish()?;
    assert_ne!(base, attr);
    assert_ne!(base, dep);
    assert_ne!(base, kind);
    Ok(())
}

#[test]
fn file_and_dir_hashes() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "x/a.txt", "hello");
    write_file(dir.path(), "x/b/c.txt", "world");

    // SHA-1 of "hello".
    assert_eq!(
        file_hash(&dir.path().join("x/a.txt"))?,
        "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
    );

    let before = hash_dir(&dir.path().join("x"))?;
    assert_eq!(before, hash_dir(&dir.path().join("x"))?);
    write_file(dir.path(), "x/b/c.txt", "world!");
    assert_ne!(before, hash_dir(&dir.path().join("x"))?);

    assert_eq!(short_hash(&before).len(), 12);
    assert_eq!(short_hash("abc"), "abc");
    Ok(())
}

fn target_hash(root: &Path, address: &str) -> Result<String, Box<dyn Error>> {
    let ws = Workspace::load(root)?;
    let ctx = ws.build_context(CancellationToken::new());
    let target = ws.graph().lookup_by_address(&Address::parse(address)?)?;
    let buildable = target.as_buildable().ok_or("not buildable")?;
    buildable.pre_build(&ctx)?;
    Ok(buildable.hash()?.to_string())
}

const APP: &str = r#"source_files = ["src"]
command = ["true"]"#;
const LIB: &str = r#"source_files = ["lib"]
command = ["true"]"#;

#[test]
fn declaration_order_and_location_do_not_change_hashes() -> TestResult {
    init_tracing();
    let one = WorkspaceBuilder::new()
        .file("app/src/main.txt", "main")
        .file("app/lib/util.txt", "util")
        .target("app", "local_exec", "bin", &format!("{APP}\ndepends_on = [\"app.local_exec.lib\"]"))
        .target("app", "local_exec", "lib", LIB)
        .build();
    let two = WorkspaceBuilder::new()
        .file("app/lib/util.txt", "util")
        .file("app/src/main.txt", "main")
        .target("app", "local_exec", "lib", LIB)
        .target("app", "local_exec", "bin", &format!("{APP}\ndepends_on = [\"app.local_exec.lib\"]"))
        .build();

    assert_eq!(
        target_hash(one.path(), "app.local_exec.bin")?,
        target_hash(two.path(), "app.local_exec.bin")?
    );
    Ok(())
}

#[test]
fn dependency_source_change_propagates() -> TestResult {
    init_tracing();
    let dir = WorkspaceBuilder::new()
        .file("app/src/main.txt", "main")
        .file("app/lib/util.txt", "util")
        .target("app", "local_exec", "bin", &format!("{APP}\ndepends_on = [\"app.local_exec.lib\"]"))
        .target("app", "local_exec", "lib", LIB)
        .build();

    let bin_before = target_hash(dir.path(), "app.local_exec.bin")?;
    let lib_before = target_hash(dir.path(), "app.local_exec.lib")?;
    write_file(dir.path(), "app/lib/util.txt", "util v2");

    assert_ne!(lib_before, target_hash(dir.path(), "app.local_exec.lib")?);
    assert_ne!(bin_before, target_hash(dir.path(), "app.local_exec.bin")?);
    Ok(())
}

#[test]
fn ignored_files_do_not_affect_the_hash() -> TestResult {
    init_tracing();
    let dir = WorkspaceBuilder::new()
        .raw("[workspace]\nignore = [\"*.log\"]")
        .file("app/src/main.txt", "main")
        .target("app", "local_exec", "bin", APP)
        .build();

    let before = target_hash(dir.path(), "app.local_exec.bin")?;
    write_file(dir.path(), "app/src/debug.log", "noise");
    assert_eq!(before, target_hash(dir.path(), "app.local_exec.bin")?);
    Ok(())
}

#[test]
fn file_names_with_newlines_are_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "x/plain.txt", "fine");
    write_file(dir.path(), "x/a\nb.txt", "odd");

    let err = hash_dir(dir.path()).unwrap_err();
    assert!(matches!(err, ArkError::HashError(ref m) if m.contains("newline")), "{err:?}");

    let err = TargetHasher::new("group")
        .source_file("src/a\nb.txt", "00")
        .finish()
        .unwrap_err();
    assert!(matches!(err, ArkError::HashError(_)));
    Ok(())
}
