//! Tests for unload, reload, refresh and enable/disable cascades

use modkit_core::{
    AdmissionFailure, Error, FailureKind, GadgetId, GadgetState, LoadOrderEngine,
    MemoryConfigStore, Toggle, Version,
};
use modkit_test_utils::{BundleFixture, GadgetFixture, MemorySource, test_engine};
use pretty_assertions::assert_eq;

fn id(qualified: &str) -> GadgetId {
    GadgetId::parse(qualified).unwrap()
}

/// `x` <- `y` <- `z`, plus an unrelated `w`.
fn chain() -> MemorySource {
    let source = MemorySource::new();
    source.add(
        BundleFixture::new("x", "1.0").gadget(
            GadgetFixture::new("x1")
                .patches("World.Tick")
                .registers("service", "clock"),
        ),
    );
    source.add(
        BundleFixture::new("y", "1.0").gadget(
            GadgetFixture::new("y1")
                .depends_on("x1")
                .registers("command", "greet"),
        ),
    );
    source.add(BundleFixture::new("z", "1.0").gadget(GadgetFixture::new("z1").depends_on("y1")));
    source.add(BundleFixture::new("w", "1.0").gadget(GadgetFixture::new("w1")));
    source
}

fn loaded(source: &MemorySource) -> LoadOrderEngine {
    let mut engine = test_engine(source);
    engine.load_all().unwrap();
    source.log().clear();
    engine
}

mod unload_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unload_cascades_to_dependents() {
        let source = chain();
        let mut engine = loaded(&source);

        let unloaded = engine.unload("x").unwrap();

        assert_eq!(unloaded, vec!["x", "y", "z"]);
        assert!(engine.bundle("x").is_none());
        assert!(engine.bundle("y").is_none());
        assert!(engine.bundle("z").is_none());
        assert_eq!(engine.state_of(&id("w:w1")), Some(GadgetState::Initialized));
        assert_eq!(engine.load_order(), vec![id("w:w1")]);
        for gadget in ["x:x1", "y:y1", "z:z1"] {
            assert!(engine.extensions().entries_from(&id(gadget)).is_empty());
            assert!(engine.node_of(&id(gadget)).is_none());
        }
        assert!(engine.interception().installed_points().is_empty());
    }

    #[test]
    fn test_unload_tears_down_latest_first() {
        let source = chain();
        let mut engine = loaded(&source);

        engine.unload("x").unwrap();

        assert_eq!(
            source.log().gadgets_for("uninitialize"),
            vec!["z:z1", "y:y1", "x:x1"]
        );
    }

    #[test]
    fn test_unload_leaf_keeps_dependencies() {
        let source = chain();
        let mut engine = loaded(&source);

        let unloaded = engine.unload("z").unwrap();

        assert_eq!(unloaded, vec!["z"]);
        assert!(engine.is_active(&id("x:x1")));
        assert!(engine.is_active(&id("y:y1")));
    }

    #[test]
    fn test_unload_follows_bundle_dependencies() {
        let source = MemorySource::new();
        source.add(BundleFixture::new("x", "1.0").gadget(GadgetFixture::new("x1")));
        source.add(
            BundleFixture::new("y", "1.0")
                .depends_on_bundle("x")
                .gadget(GadgetFixture::new("y1")),
        );
        let mut engine = loaded(&source);

        assert_eq!(engine.unload("x").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_fresh_load_after_unload() {
        let source = chain();
        let mut engine = loaded(&source);
        engine.unload("x").unwrap();

        engine.load_bundle(&MemorySource::handle("x")).unwrap();

        assert_eq!(engine.state_of(&id("x:x1")), Some(GadgetState::Initialized));
        assert_eq!(engine.extensions().entries_from(&id("x:x1")).len(), 1);
        assert!(engine.bundle("y").is_none());
    }

    #[test]
    fn test_unload_unknown_bundle() {
        let source = chain();
        let mut engine = loaded(&source);

        let err = engine.unload("nope").unwrap_err();

        assert!(matches!(err, Error::UnknownBundle(name) if name == "nope"));
    }
}

mod reload_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reload_picks_up_new_version() {
        let source = chain();
        let mut engine = loaded(&source);
        source.add(BundleFixture::new("x", "1.1").gadget(GadgetFixture::new("x1")));

        let version = *engine.reload("x").unwrap().version();

        assert_eq!(version, Version::parse("1.1").unwrap());
        for gadget in ["x:x1", "y:y1", "z:z1", "w:w1"] {
            assert_eq!(engine.state_of(&id(gadget)), Some(GadgetState::Initialized));
        }
        // The new x1 registers nothing
        assert!(engine.extensions().entries_from(&id("x:x1")).is_empty());
    }

    #[test]
    fn test_reload_rereads_dependents_in_original_order() {
        let source = chain();
        let mut engine = loaded(&source);
        let reads_before = source.manifest_reads();

        engine.reload("x").unwrap();

        assert_eq!(source.manifest_reads(), reads_before + 3);
        let sequence = |name: &str| engine.bundle(name).unwrap().sequence();
        assert!(sequence("x") < sequence("y"));
        assert!(sequence("y") < sequence("z"));
    }

    #[test]
    fn test_reload_failure_leaves_target_unloaded() {
        let source = chain();
        let mut engine = loaded(&source);
        source.add(
            BundleFixture::new("x", "1.0")
                .gadget(GadgetFixture::new("x1"))
                .broken_payload("truncated"),
        );

        let err = engine.reload("x").unwrap_err();

        assert!(matches!(err, Error::Structural { .. }));
        assert!(engine.bundle("x").is_none());
        assert_eq!(engine.state_of(&id("y:y1")), Some(GadgetState::Disabled));
        assert!(matches!(
            engine.gadget(&id("y:y1")).unwrap().last_failure().map(|f| &f.kind),
            Some(FailureKind::Admission(AdmissionFailure::MissingDependency { .. }))
        ));
    }
}

mod refresh_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_refresh_redrives_with_fresh_behaviors() {
        let source = chain();
        let mut engine = loaded(&source);
        let reads_before = source.manifest_reads();

        engine.refresh("y").unwrap();

        let log = source.log();
        assert_eq!(log.gadgets_for("uninitialize"), vec!["z:z1", "y:y1"]);
        assert_eq!(log.gadgets_for("load_config"), vec!["y:y1", "z:z1"]);
        assert_eq!(log.gadgets_for("initialize"), vec!["y:y1", "z:z1"]);
        assert_eq!(source.manifest_reads(), reads_before);
        assert_eq!(engine.extensions().entries_from(&id("y:y1")).len(), 1);
        assert_eq!(engine.last_report().activated, vec![id("y:y1"), id("z:z1")]);
    }

    #[test]
    fn test_refresh_unknown_bundle() {
        let source = chain();
        let mut engine = loaded(&source);

        assert!(matches!(engine.refresh("nope"), Err(Error::UnknownBundle(_))));
    }
}

mod enable_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disable_cascades_without_touching_intent() {
        let source = chain();
        let mut engine = loaded(&source);

        engine.set_enabled(&Toggle::Gadget(id("x:x1")), false).unwrap();

        for gadget in ["x:x1", "y:y1", "z:z1"] {
            assert_eq!(engine.state_of(&id(gadget)), Some(GadgetState::Disabled));
        }
        assert!(engine.is_active(&id("w:w1")));

        let x1 = engine.gadget(&id("x:x1")).unwrap();
        assert!(!x1.is_enabled());
        assert!(x1.last_failure().is_none());

        let y1 = engine.gadget(&id("y:y1")).unwrap();
        assert!(y1.is_enabled());
        assert_eq!(
            y1.last_failure().map(|f| f.kind.clone()),
            Some(FailureKind::Admission(AdmissionFailure::DependencyInactive {
                target: id("x:x1")
            }))
        );
        assert!(engine.extensions().entries_from(&id("y:y1")).is_empty());
        assert_eq!(
            source.log().gadgets_for("uninitialize"),
            vec!["z:z1", "y:y1", "x:x1"]
        );
    }

    #[test]
    fn test_reenable_brings_dependents_back() {
        let source = chain();
        let mut engine = loaded(&source);
        engine.set_enabled(&Toggle::Gadget(id("x:x1")), false).unwrap();

        engine.set_enabled(&Toggle::Gadget(id("x:x1")), true).unwrap();

        for gadget in ["x:x1", "y:y1", "z:z1", "w:w1"] {
            assert_eq!(engine.state_of(&id(gadget)), Some(GadgetState::Initialized));
        }
        assert_eq!(
            engine.last_report().activated,
            vec![id("x:x1"), id("y:y1"), id("z:z1")]
        );
    }

    #[test]
    fn test_disabling_bundle_disables_its_gadgets() {
        let source = chain();
        let mut engine = loaded(&source);

        engine.set_enabled(&Toggle::Bundle("y".to_string()), false).unwrap();

        assert!(engine.is_active(&id("x:x1")));
        assert!(!engine.is_active(&id("y:y1")));
        assert!(!engine.is_active(&id("z:z1")));
        assert!(!engine.bundle("y").unwrap().is_enabled());
        assert!(engine.gadget(&id("y:y1")).unwrap().is_enabled());
    }

    #[test]
    fn test_disabled_dependency_bundle_blocks_admission() {
        let source = MemorySource::new();
        source.add(BundleFixture::new("x", "1.0").gadget(GadgetFixture::new("x1")));
        source.add(
            BundleFixture::new("y", "1.0")
                .depends_on_bundle("x")
                .gadget(GadgetFixture::new("y1")),
        );
        let mut engine = LoadOrderEngine::builder(source.clone())
            .config_store(MemoryConfigStore::new().with_flag("x", false))
            .build()
            .unwrap();

        let report = engine.load_all().unwrap().clone();

        assert_eq!(
            report.failure_for(&id("y:y1")).map(|f| f.kind.clone()),
            Some(FailureKind::Admission(AdmissionFailure::BundleDisabled {
                bundle: "x".to_string()
            }))
        );
        assert!(report.failure_for(&id("x:x1")).is_none());
    }

    #[test]
    fn test_disabled_intent_is_respected_on_load() {
        let source = chain();
        let mut engine = LoadOrderEngine::builder(source.clone())
            .config_store(MemoryConfigStore::new().with_flag("w:w1", false))
            .build()
            .unwrap();

        engine.load_all().unwrap();

        let w1 = engine.gadget(&id("w:w1")).unwrap();
        assert!(!w1.is_enabled());
        assert_eq!(w1.state(), GadgetState::Disabled);
        assert!(w1.last_failure().is_none());
        assert!(source.log().gadgets_for("load_config").iter().all(|g| g != "w:w1"));
    }

    #[test]
    fn test_set_enabled_persists_flags() {
        let source = chain();
        let mut engine = loaded(&source);

        engine.set_enabled(&Toggle::Gadget(id("w:w1")), false).unwrap();

        let flags = engine.config_store().enabled_flags().unwrap();
        assert_eq!(flags.get("w:w1"), Some(&false));
        assert_eq!(flags.get("x:x1"), Some(&true));
    }

    #[test]
    fn test_set_enabled_unknown_target() {
        let source = chain();
        let mut engine = loaded(&source);

        let err = engine
            .set_enabled(&Toggle::Gadget(id("nope:n1")), false)
            .unwrap_err();

        assert!(matches!(err, Error::UnknownGadget(_)));
    }
}
