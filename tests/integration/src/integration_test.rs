//! End-to-end integration test for declarative bundles on disk
//!
//! This test exercises the complete flow: manifest discovery -> admission
//! and activation -> conflict detection -> persisted intent -> reload.

use modkit_core::{
    ConfigStore, DirectorySource, GadgetConfig, GadgetId, GadgetState, LoadOrderEngine, Toggle,
    TomlConfigStore, Version,
};
use modkit_test_utils::BundleDir;
use pretty_assertions::assert_eq;

fn id(qualified: &str) -> GadgetId {
    GadgetId::parse(qualified).unwrap()
}

/// Set up a bundle directory with three bundles and one config file
fn setup_bundles() -> BundleDir {
    let dir = BundleDir::new();
    dir.write_bundle(
        "core",
        r#"
[bundle]
name = "core"
version = "1.4"

[[gadgets]]
name = "stats"

[[gadgets.patches]]
point = "Player.TakeHit"
"#,
    );
    dir.write_bundle(
        "combat",
        r#"
[bundle]
name = "combat"
version = "2.0"
dependencies = ["core"]

[[gadgets]]
name = "damage"
dependencies = [{ gadget = "stats", version = "1.2", specificity = "major" }]

[[gadgets.patches]]
point = "Player.TakeHit"
short_circuit = true
"#,
    );
    dir.write_bundle(
        "legacy",
        r#"
[bundle]
name = "legacy"
version = "0.9"

[[gadgets]]
name = "old"
target_engine = "0.9"
target_specificity = "minor"
"#,
    );
    dir.write_gadget_config("core", "stats", "base_health = 100\n");
    dir
}

fn open(dir: &BundleDir) -> LoadOrderEngine {
    LoadOrderEngine::builder(DirectorySource::new(dir.bundles_root()))
        .config_store(TomlConfigStore::new(dir.state_root()))
        .build()
        .unwrap()
}

#[test]
fn test_load_directory_end_to_end() {
    let dir = setup_bundles();
    let mut engine = open(&dir);

    let report = engine.load_all().unwrap().clone();

    assert_eq!(report.activated, vec![id("core:stats"), id("combat:damage")]);
    assert_eq!(engine.state_of(&id("legacy:old")), Some(GadgetState::Disabled));
    assert!(
        report
            .failure_for(&id("legacy:old"))
            .unwrap()
            .to_string()
            .contains("built for engine")
    );

    // combat short-circuits Player.TakeHit past core without any ordering hint
    assert_eq!(report.conflicts.pair_count(), 1);
    let pair = &report.conflicts.for_point("Player.TakeHit").unwrap().pairs[0];
    assert_eq!(pair.overriding, id("combat:damage"));
    assert_eq!(pair.other, id("core:stats"));
}

#[test]
fn test_gadget_config_is_found_on_disk() {
    let dir = setup_bundles();
    let store = TomlConfigStore::new(dir.state_root());

    let config: GadgetConfig = store.load(&id("core:stats")).unwrap();

    assert_eq!(config["base_health"].as_integer(), Some(100));
}

#[test]
fn test_intent_survives_restart() {
    let dir = setup_bundles();

    let mut engine = open(&dir);
    engine.load_all().unwrap();
    engine
        .set_enabled(&Toggle::Bundle("core".to_string()), false)
        .unwrap();
    assert!(!engine.is_active(&id("combat:damage")));
    drop(engine);

    let mut restarted = open(&dir);
    let report = restarted.load_all().unwrap().clone();

    assert!(report.activated.is_empty());
    assert!(!restarted.bundle("core").unwrap().is_enabled());
    assert!(
        report
            .failure_for(&id("combat:damage"))
            .unwrap()
            .to_string()
            .contains("required bundle 'core' is disabled")
    );
}

#[test]
fn test_reload_reads_edited_manifest() {
    let dir = setup_bundles();
    let mut engine = open(&dir);
    engine.load_all().unwrap();

    dir.write_bundle(
        "core",
        r#"
[bundle]
name = "core"
version = "1.5"

[[gadgets]]
name = "stats"
"#,
    );
    engine.reload("core").unwrap();

    assert_eq!(
        *engine.bundle("core").unwrap().version(),
        Version::parse("1.5").unwrap()
    );
    assert!(engine.is_active(&id("combat:damage")));
    // core no longer patches the point, so nothing is left to conflict with
    assert!(engine.list_conflicts().is_empty());
}

#[test]
fn test_report_serializes_to_json() {
    let dir = setup_bundles();
    let mut engine = open(&dir);

    let report = engine.load_all().unwrap().clone();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["activated"][0], "core:stats");
    assert_eq!(json["failures"][0]["gadget"], "legacy:old");
    assert_eq!(json["failures"][0]["detail"]["reason"], "incompatible-engine");
    assert_eq!(json["patch_stats"]["core:stats"]["patched"], 1);
}
