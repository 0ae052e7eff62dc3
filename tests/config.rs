use std::collections::HashMap;
use std::error::Error;

use ark::config::{EntrypointEnv, WorkspaceFile, load_and_validate};
use ark::config::loader::parse_str;
use ark::errors::ArkError;
use ark::types::RestartMode;
use ark::workspace::Workspace;
use ark_test_utils::{WorkspaceBuilder, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

fn parse(toml: &str) -> Result<WorkspaceFile, ArkError> {
    WorkspaceFile::try_from(parse_str(toml)?)
}

fn load_err(builder: WorkspaceBuilder) -> ArkError {
    let dir = builder.build();
    Workspace::load(dir.path()).unwrap_err()
}

#[test]
fn full_example_parses() -> TestResult {
    let file = parse(
        r#"
[workspace]
ark_dir = ".ark"
ignore = ["node_modules/", "*.log"]
concurrency = 4
coalesce_ms = 100

[artifacts]
storage_dir = "cache"

[package.web]
description = "frontend"

[package.web.target.local_exec.build]
depends_on = ["web.local_file.env"]
source_files = ["src"]
include_patterns = ["**/*.ts"]
exclude_patterns = ["**/*.test.ts"]
command = ["sh", "-c", "cp -r src \"$ARK_ARTIFACTS_DIR\"/"]
workdir = "."

[package.web.target.local_file.env]
filename = "env.txt"
content = "package=${package.name} root=${workspace.root}"
"#,
    )?;

    assert_eq!(file.workspace.concurrency, Some(4));
    assert_eq!(file.target_count(), 2);
    let web = &file.packages["web"];
    assert_eq!(web.dir, "web");
    let build = web
        .targets
        .iter()
        .find(|t| t.address.as_str() == "web.local_exec.build")
        .unwrap();
    assert_eq!(build.depends_on[0].as_str(), "web.local_file.env");
    assert_eq!(build.source_files, vec!["src"]);
    assert!(build.attributes.contains_key("command"));
    assert!(!build.attributes.contains_key("depends_on"));
    Ok(())
}

#[test]
fn unknown_top_level_key_is_rejected() {
    assert!(parse_str("[workspcae]\nark_dir = \"x\"").is_err());
}

#[test]
fn invalid_values_are_config_errors() {
    for toml in [
        "[workspace]\nconcurrency = 0",
        "[workspace]\nark_dir = \"../state\"",
        "[artifacts]\nstorage_dir = \"\"",
        "[package.\"bad name\"]",
        "[package.app]\ndir = \"/abs\"",
        "[package.app.target.group.x]\ndepends_on = \"app.group.y\"",
        "[package.app.target.group.x]\ndepends_on = [\"not-an-address\"]",
        "[package.app.target.group.x]\nsource_files = [\"../outside\"]",
    ] {
        let err = parse(toml).unwrap_err();
        assert!(matches!(err, ArkError::ConfigError(_)), "{toml:?} gave {err:?}");
    }
}

#[test]
fn cycle_is_a_graph_error() {
    init_tracing();
    let err = load_err(
        WorkspaceBuilder::new()
            .target("app", "group", "a", r#"depends_on = ["app.group.b"]"#)
            .target("app", "group", "b", r#"depends_on = ["app.group.a"]"#),
    );
    assert!(matches!(err, ArkError::GraphError(ref m) if m.contains("cycle")), "{err:?}");
}

#[test]
fn unknown_address_is_a_graph_error() {
    init_tracing();
    let err = load_err(
        WorkspaceBuilder::new().target("app", "group", "a", r#"depends_on = ["app.group.missing"]"#),
    );
    assert!(matches!(err, ArkError::GraphError(_)), "{err:?}");
}

#[test]
fn unknown_kind_is_a_graph_error() {
    init_tracing();
    let err = load_err(WorkspaceBuilder::new().target("app", "docker_image", "a", ""));
    assert!(matches!(err, ArkError::GraphError(ref m) if m.contains("docker_image")), "{err:?}");
}

#[test]
fn attribute_references_add_edges() -> TestResult {
    init_tracing();
    let dir = WorkspaceBuilder::new()
        .target("app", "local_file", "env", "filename = \"env\"\ncontent = \"x\"")
        .target(
            "app",
            "local_exec",
            "run",
            r#"command = ["cat", "${app.local_file.env.artifacts_dir}/env"]"#,
        )
        .build();
    let ws = Workspace::load(dir.path())?;
    let run = ark::target::Address::parse("app.local_exec.run")?;
    let deps: Vec<String> = ws
        .graph()
        .dependencies_of(&run)
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(deps, vec!["app.local_file.env"]);
    Ok(())
}

#[test]
fn load_and_validate_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_and_validate(dir.path().join("ark.toml")).is_err());
}

#[test]
fn workspace_root_is_found_from_a_subdirectory() -> TestResult {
    let dir = WorkspaceBuilder::new().file("a/b/c/x.txt", "x").build();
    let found = ark::config::find_workspace_root(&dir.path().join("a/b/c"))?;
    assert_eq!(found, dir.path());
    Ok(())
}

fn env_from(pairs: &[(&str, &str)]) -> Result<EntrypointEnv, ArkError> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EntrypointEnv::from_lookup(|key| map.get(key).cloned())
}

#[test]
fn entrypoint_env_defaults() -> TestResult {
    let env = env_from(&[])?;
    assert_eq!(env.restart_mode, RestartMode::Auto);
    assert_eq!(env.sync_port, 9000);
    assert_eq!(env.log_sink_port, 9000);
    assert_eq!(env.org_id, "default");
    assert!(!env.log_shipping_enabled());
    Ok(())
}

#[test]
fn entrypoint_env_overrides() -> TestResult {
    let env = env_from(&[
        ("ARK_EP_RESTART_MODE", "Manual"),
        ("ARK_EP_GRPC_PORT", "7000"),
        ("ARK_USER_TOKEN", "tok"),
        ("ARK_LOG_SINK_URL", "logs:9100"),
        ("ARK_PROJECT_ID", "p1"),
        ("ARK_ORG_ID", ""),
    ])?;
    assert_eq!(env.restart_mode, RestartMode::Manual);
    assert_eq!(env.sync_port, 7000);
    assert_eq!(env.project_id, "p1");
    assert_eq!(env.org_id, "default");
    assert!(env.log_shipping_enabled());
    Ok(())
}

#[test]
fn entrypoint_env_rejects_bad_values() {
    assert!(matches!(
        env_from(&[("ARK_EP_RESTART_MODE", "sometimes")]),
        Err(ArkError::ConfigError(_))
    ));
    assert!(matches!(
        env_from(&[("ARK_EP_GRPC_PORT", "99999")]),
        Err(ArkError::ConfigError(_))
    ));
}

#[test]
fn log_sink_endpoint_falls_back_to_the_sink_port() -> TestResult {
    let env = env_from(&[("ARK_LOG_SINK_URL", "logs.internal:9100"), ("LOG_SINK_GRPC_PORT", "7100")])?;
    assert_eq!(env.log_sink_endpoint().as_deref(), Some("logs.internal:9100"));

    let env = env_from(&[("ARK_LOG_SINK_URL", "logs.internal"), ("LOG_SINK_GRPC_PORT", "7100")])?;
    assert_eq!(env.log_sink_endpoint().as_deref(), Some("logs.internal:7100"));

    let env = env_from(&[("ARK_LOG_SINK_URL", "logs.internal")])?;
    assert_eq!(env.log_sink_endpoint().as_deref(), Some("logs.internal:9000"));

    assert_eq!(env_from(&[])?.log_sink_endpoint(), None);
    Ok(())
}
