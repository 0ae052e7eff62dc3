use std::error::Error;

use ark::actions::{Action, ActionMatcher};
use ark::patterns::PatternSet;
use proptest::prelude::*;

type TestResult = Result<(), Box<dyn Error>>;

fn npm_install() -> Action {
    Action::new(vec!["npm", "install"], ".", vec!["package.json", "package-lock.json"])
}

fn rebuild_css() -> Action {
    Action::new(vec!["make", "css"], "web", vec!["web/styles/**/*.scss"])
}

#[test]
fn selects_matching_actions_in_declaration_order() -> TestResult {
    let matcher = ActionMatcher::new(vec![rebuild_css(), npm_install()])?;

    let selected = matcher.select(["package.json", "web/styles/site/main.scss"]);
    assert_eq!(selected, vec![rebuild_css(), npm_install()]);

    let selected = matcher.select(["web/package.json"]);
    assert_eq!(selected, vec![npm_install()]);

    assert!(matcher.select(["README.md"]).is_empty());
    assert!(matcher.select(std::iter::empty::<&str>()).is_empty());
    Ok(())
}

#[test]
fn identical_actions_are_selected_once() -> TestResult {
    let matcher = ActionMatcher::new(vec![npm_install(), rebuild_css(), npm_install()])?;
    let selected = matcher.select(["package.json", "package-lock.json"]);
    assert_eq!(selected, vec![npm_install()]);
    Ok(())
}

#[test]
fn actions_for_a_single_file() -> TestResult {
    let matcher = ActionMatcher::new(vec![npm_install(), rebuild_css()])?;
    let hits: Vec<&Action> = matcher.actions_for("web/styles/a.scss").collect();
    assert_eq!(hits, vec![&rebuild_css()]);
    Ok(())
}

#[test]
fn invalid_pattern_is_rejected() {
    let broken = Action::new(vec!["true"], ".", vec!["src/[a-"]);
    assert!(ActionMatcher::new(vec![broken]).is_err());
}

#[test]
fn pattern_rules() -> TestResult {
    let set = PatternSet::compile(&["*.log", "/build", "node_modules/", "src/**/*.ts"])?;
    assert!(set.matches_file("debug.log"));
    assert!(set.matches_file("deep/nested/debug.log"));
    assert!(set.matches_file("build/out.js"));
    assert!(!set.matches_file("app/build/out.js"));
    assert!(set.matches_file("web/node_modules/left-pad/index.js"));
    assert!(set.matches_file("src/a/b/c.ts"));
    assert!(!set.matches_file("lib/c.ts"));
    assert!(!set.matches_file("src/main.rs"));
    Ok(())
}

const FILES: [&str; 6] = [
    "package.json",
    "web/package.json",
    "web/styles/a.scss",
    "web/styles/x/b.scss",
    "src/main.ts",
    "README.md",
];

proptest! {
    // Every selected action has a matching file, every action with a
    // matching file is selected, and no action appears twice.
    #[test]
    fn selection_is_exactly_the_matching_actions(
        picked in prop::collection::vec(prop::sample::select(FILES.to_vec()), 0..6),
        order in prop::collection::vec(0usize..3, 0..6),
    ) {
        let pool = [
            npm_install(),
            rebuild_css(),
            Action::new(vec!["tsc"], ".", vec!["src/**/*.ts"]),
        ];
        let declared: Vec<Action> = order.iter().map(|i| pool[*i].clone()).collect();
        let matcher = ActionMatcher::new(declared.clone()).unwrap();
        let selected = matcher.select(picked.iter().copied());

        let mut expected: Vec<Action> = Vec::new();
        for action in &declared {
            let set = PatternSet::compile(&action.patterns).unwrap();
            if picked.iter().any(|f| set.matches_file(f)) && !expected.contains(action) {
                expected.push(action.clone());
            }
        }
        prop_assert_eq!(selected, expected);
    }
}
