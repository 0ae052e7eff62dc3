use std::error::Error;
use std::time::Duration;

use ark::observer::{ChangeNotification, File, FileType, Observer, diff, scan};
use ark::patterns::{FileFilter, PatternSet, SourceRule};
use ark_test_utils::builders::write_file;
use ark_test_utils::{init_tracing, with_timeout};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn everything() -> FileFilter {
    FileFilter::everything(PatternSet::default()).unwrap()
}

#[test]
fn diff_reports_new_modified_and_deleted_entries() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "keep.txt", "same");
    write_file(dir.path(), "edit.txt", "v1");
    write_file(dir.path(), "drop.txt", "bye");
    let before = scan(dir.path(), &everything(), None)?;

    write_file(dir.path(), "edit.txt", "v2");
    std::fs::remove_file(dir.path().join("drop.txt"))?;
    write_file(dir.path(), "sub/new.txt", "hi");
    std::os::unix::fs::symlink("keep.txt", dir.path().join("link"))?;
    let after = scan(dir.path(), &everything(), Some(&before))?;

    let files = diff(dir.path(), &before, &after);
    let summary: Vec<(&str, bool, bool, FileType)> = files
        .iter()
        .map(|f| (f.rel_name.as_str(), f.exists, f.new, f.file_type))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("drop.txt", false, false, FileType::File),
            ("edit.txt", true, false, FileType::File),
            ("link", true, true, FileType::Symlink),
            ("sub", true, true, FileType::Dir),
            ("sub/new.txt", true, true, FileType::File),
        ]
    );

    let link = files.iter().find(|f| f.rel_name == "link").unwrap();
    assert_eq!(link.symlink_target.as_deref(), Some("keep.txt"));
    let edited = files.iter().find(|f| f.rel_name == "edit.txt").unwrap();
    assert_eq!(edited.hash.len(), 40);
    Ok(())
}

#[test]
fn ignored_directories_are_pruned() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "node_modules/pkg/index.js", "x");
    write_file(dir.path(), "src/app.js", "y");
    let ignores = PatternSet::compile(&["node_modules/"])?;
    let snapshot = scan(dir.path(), &FileFilter::everything(ignores)?, None)?;

    let paths: Vec<&str> = snapshot.paths().collect();
    assert!(paths.contains(&"src/app.js"));
    assert!(paths.iter().all(|p| !p.starts_with("node_modules")));
    Ok(())
}

fn record(rel: &str, exists: bool, new: bool, hash: &str) -> File {
    File {
        name: format!("/ws/{rel}"),
        rel_name: rel.to_string(),
        exists,
        new,
        file_type: FileType::File,
        hash: hash.to_string(),
        symlink_target: None,
    }
}

#[test]
fn merge_keeps_latest_delta_per_path() {
    let mut first = ChangeNotification::new("/ws", vec![record("b.txt", true, true, "1"), record("a.txt", true, false, "1")]);
    let later = ChangeNotification::new("/ws", vec![record("b.txt", true, false, "2"), record("c.txt", false, false, "")]);
    first.merge(later);

    let merged: Vec<(&str, bool, bool, &str)> = first
        .files
        .iter()
        .map(|f| (f.rel_name.as_str(), f.exists, f.new, f.hash.as_str()))
        .collect();
    assert_eq!(
        merged,
        vec![
            ("a.txt", true, false, "1"),
            ("b.txt", true, true, "2"),
            ("c.txt", false, false, ""),
        ]
    );
}

fn rel_path() -> impl Strategy<Value = String> {
    let dirs = prop::sample::select(vec!["src", "lib", "build", "node_modules", "a", "b"]);
    let files = prop::sample::select(vec!["main.rs", "x.ts", "y.test.ts", "z.log", "README.md"]);
    (proptest::collection::vec(dirs, 0..3), files).prop_map(|(dirs, file)| {
        let mut parts = dirs;
        parts.push(file);
        parts.join("/")
    })
}

proptest! {
    #[test]
    fn filter_never_keeps_ignored_excluded_or_unincluded(rel in rel_path()) {
        let includes = ["**/*.ts", "**/*.rs"];
        let excludes = ["**/*.test.ts"];
        let ignores = ["node_modules/", "*.log", "/build/"];
        let rule = SourceRule::new(&["src", "lib"], &includes, &excludes).unwrap();
        let filter = FileFilter::new(vec![rule], PatternSet::compile(&ignores).unwrap());

        let include_set = PatternSet::compile(&includes).unwrap();
        let exclude_set = PatternSet::compile(&excludes).unwrap();
        let ignore_set = PatternSet::compile(&ignores).unwrap();

        if filter.keeps(&rel) {
            prop_assert!(!ignore_set.matches_file(&rel));
            prop_assert!(!exclude_set.matches_file(&rel));
            prop_assert!(include_set.matches_file(&rel));
            prop_assert!(rel.starts_with("src/") || rel.starts_with("lib/"));
            prop_assert!(!rel.contains("node_modules/"));
        }
    }
}

#[tokio::test]
async fn subscribers_only_see_changes_their_filter_keeps() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "src/a.ts", "1");
    write_file(dir.path(), "docs/readme.md", "1");

    let cancel = CancellationToken::new();
    let observer = Observer::spawn(
        dir.path(),
        PatternSet::compile(&["*.log"])?,
        Duration::from_millis(20),
        cancel.clone(),
    )?;
    let src_rule = SourceRule::new(&["src"], &[], &[])?;
    let mut src = observer.subscribe(FileFilter::new(vec![src_rule], PatternSet::compile(&["*.log"])?));
    let mut all = observer.subscribe(FileFilter::everything(PatternSet::compile(&["*.log"])?)?);

    write_file(dir.path(), "docs/readme.md", "2");
    write_file(dir.path(), "src/debug.log", "noise");
    write_file(dir.path(), "src/a.ts", "2");

    // The `all` subscriber sees the docs change at some point.
    let mut seen_docs = false;
    while !seen_docs {
        let n = with_timeout(all.next()).await.expect("observer closed")?;
        assert!(n.rel_names().all(|r| !r.ends_with(".log")));
        seen_docs = n.rel_names().any(|r| r == "docs/readme.md");
    }

    let n = with_timeout(src.next()).await.expect("observer closed")?;
    let names: Vec<&str> = n.rel_names().collect();
    assert_eq!(names, vec!["src/a.ts"]);
    assert!(!n.files[0].new);

    cancel.cancel();
    // Cancelling closes every subscription.
    while with_timeout(src.next()).await.is_some() {}
    Ok(())
}
