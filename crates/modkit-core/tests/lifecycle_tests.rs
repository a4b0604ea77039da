//! Tests for admission and the staged activation pipeline

use modkit_core::{
    AdmissionFailure, DeclaredPatch, EngineConfig, Error, FailureKind, GadgetId, GadgetState,
    LoadOrderEngine, MemoryConfigStore, Specificity, Stage,
};
use modkit_test_utils::{
    BundleFixture, FlakyInterception, GadgetFixture, Hook, MemorySource, test_engine,
    test_engine_with,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn id(qualified: &str) -> GadgetId {
    GadgetId::parse(qualified).unwrap()
}

fn provider() -> BundleFixture {
    BundleFixture::new("x", "1.0").gadget(GadgetFixture::new("x1").registers("service", "clock"))
}

fn consumer() -> BundleFixture {
    BundleFixture::new("y", "1.0").gadget(
        GadgetFixture::new("y1")
            .depends_on("x1")
            .registers("command", "greet"),
    )
}

mod admission_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_provider_then_consumer_both_initialize() {
        let source = MemorySource::new();
        source.add(provider());
        source.add(consumer());
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.activated, vec![id("x:x1"), id("y:y1")]);
        assert!(report.failures.is_empty());
        assert_eq!(engine.state_of(&id("x:x1")), Some(GadgetState::Initialized));
        assert_eq!(engine.state_of(&id("y:y1")), Some(GadgetState::Initialized));
        assert_eq!(engine.load_order(), vec![id("x:x1"), id("y:y1")]);
    }

    #[test]
    fn test_consumer_alone_fails_with_missing_dependency() {
        let source = MemorySource::new();
        source.add(consumer());
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        let failure = report.failure_for(&id("y:y1")).unwrap();
        assert_eq!(failure.stage, Stage::Admission);
        assert_eq!(
            failure.kind,
            FailureKind::Admission(AdmissionFailure::MissingDependency {
                target: "x1".to_string()
            })
        );
        assert_eq!(engine.state_of(&id("y:y1")), Some(GadgetState::Disabled));
        assert!(!engine.is_active(&id("y:y1")));
        assert!(engine.extensions().entries_from(&id("y:y1")).is_empty());
    }

    #[test]
    fn test_dormant_consumer_is_retried_when_provider_arrives() {
        let source = MemorySource::new();
        source.add(consumer());
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        source.add(provider());
        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.activated, vec![id("x:x1"), id("y:y1")]);
        assert_eq!(engine.state_of(&id("y:y1")), Some(GadgetState::Initialized));
        assert!(engine.gadget(&id("y:y1")).unwrap().last_failure().is_none());
    }

    #[test]
    fn test_dormant_chain_is_retried_when_its_root_arrives() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("z", "1.0").gadget(GadgetFixture::new("z1").depends_on("y1")),
        );
        source.add(
            BundleFixture::new("y", "1.0").gadget(GadgetFixture::new("y1").depends_on("x1")),
        );
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();
        assert_eq!(engine.state_of(&id("y:y1")), Some(GadgetState::Disabled));
        assert_eq!(engine.state_of(&id("z:z1")), Some(GadgetState::Disabled));

        source.add(provider());
        let report = engine.load_all().unwrap().clone();

        assert!(report.failures.is_empty());
        assert_eq!(report.activated, vec![id("x:x1"), id("y:y1"), id("z:z1")]);
        for gadget in ["x:x1", "y:y1", "z:z1"] {
            assert_eq!(engine.state_of(&id(gadget)), Some(GadgetState::Initialized));
        }
    }

    #[test]
    fn test_dormant_consumer_stays_disabled_without_retry() {
        let source = MemorySource::new();
        source.add(consumer());
        let config = EngineConfig {
            retry_dormant: false,
            ..EngineConfig::default()
        };
        let mut engine = test_engine_with(&source, config);
        engine.load_all().unwrap();

        source.add(provider());
        engine.load_all().unwrap();

        assert_eq!(engine.state_of(&id("x:x1")), Some(GadgetState::Initialized));
        assert_eq!(engine.state_of(&id("y:y1")), Some(GadgetState::Disabled));
    }

    #[test]
    fn test_qualified_dependency_only_matches_that_bundle() {
        let source = MemorySource::new();
        source.add(provider());
        source.add(
            BundleFixture::new("y", "1.0").gadget(GadgetFixture::new("y1").depends_on("other:x1")),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert!(matches!(
            report.failure_for(&id("y:y1")).map(|f| &f.kind),
            Some(FailureKind::Admission(AdmissionFailure::MissingDependency { .. }))
        ));
    }

    #[rstest]
    #[case::same_minor("1.0", Specificity::Minor, "1.0.4", true)]
    #[case::newer_minor_rejected("1.0", Specificity::Minor, "1.2", false)]
    #[case::newer_minor_under_major("1.0", Specificity::Major, "1.2", true)]
    #[case::older_minor_under_major("1.4", Specificity::Major, "1.2", false)]
    #[case::other_major("2.0", Specificity::Major, "1.5", false)]
    #[case::bugfix_exact("1.2.3", Specificity::Bugfix, "1.2.3.0", true)]
    #[case::bugfix_differs("1.2.3", Specificity::Bugfix, "1.2.3.1", false)]
    fn test_dependency_version_requirement(
        #[case] required: &str,
        #[case] specificity: Specificity,
        #[case] actual: &str,
        #[case] admitted: bool,
    ) {
        let source = MemorySource::new();
        source.add(BundleFixture::new("x", actual).gadget(GadgetFixture::new("x1")));
        source.add(
            BundleFixture::new("y", "1.0")
                .gadget(GadgetFixture::new("y1").requires("x1", required, specificity)),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.was_activated(&id("y:y1")), admitted);
        if !admitted {
            assert!(matches!(
                report.failure_for(&id("y:y1")).map(|f| &f.kind),
                Some(FailureKind::Admission(AdmissionFailure::IncompatibleVersion { .. }))
            ));
        }
    }

    #[rstest]
    #[case::same_minor("1.0", Specificity::Minor, true)]
    #[case::newer_engine_required("1.1", Specificity::Minor, false)]
    #[case::other_major("2.0", Specificity::Major, false)]
    fn test_engine_version_requirement(
        #[case] required: &str,
        #[case] specificity: Specificity,
        #[case] admitted: bool,
    ) {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("x", "1.0")
                .gadget(GadgetFixture::new("x1").targets_engine(required, specificity)),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.was_activated(&id("x:x1")), admitted);
        if !admitted {
            assert!(matches!(
                report.failure_for(&id("x:x1")).map(|f| &f.kind),
                Some(FailureKind::Admission(AdmissionFailure::IncompatibleEngine { .. }))
            ));
        }
    }

    #[test]
    fn test_missing_bundle_dependency_blocks_every_gadget() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("y", "1.0")
                .depends_on_bundle("x")
                .gadget(GadgetFixture::new("y1"))
                .gadget(GadgetFixture::new("y2")),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert!(report.activated.is_empty());
        for gadget in ["y:y1", "y:y2"] {
            assert_eq!(
                report.failure_for(&id(gadget)).unwrap().kind,
                FailureKind::Admission(AdmissionFailure::MissingBundle {
                    bundle: "x".to_string()
                })
            );
        }
    }

    #[test]
    fn test_bundle_dependency_orders_before_listing_order() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("y", "1.0")
                .depends_on_bundle("x")
                .gadget(GadgetFixture::new("y1")),
        );
        source.add(BundleFixture::new("x", "1.0").gadget(GadgetFixture::new("x1")));
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.activated, vec![id("x:x1"), id("y:y1")]);
    }

    #[test]
    fn test_independent_gadgets_keep_load_order() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("b", "1.0")
                .gadget(GadgetFixture::new("second"))
                .gadget(GadgetFixture::new("first")),
        );
        source.add(BundleFixture::new("a", "1.0").gadget(GadgetFixture::new("third")));
        let mut engine = test_engine(&source);

        engine.load_all().unwrap();

        assert_eq!(
            engine.load_order(),
            vec![id("b:second"), id("b:first"), id("a:third")]
        );
    }
}

mod structural_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invalid_version_is_skipped_with_warning() {
        let source = MemorySource::new();
        source.add(BundleFixture::new("bad", "1.x").gadget(GadgetFixture::new("g")));
        source.add(provider());
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert!(engine.bundle("bad").is_none());
        assert_eq!(report.activated, vec![id("x:x1")]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("mem://bad"));
    }

    #[test]
    fn test_load_bundle_surfaces_structural_error() {
        let source = MemorySource::new();
        let handle = source.add(BundleFixture::new("bad", "").gadget(GadgetFixture::new("g")));
        let mut engine = test_engine(&source);

        let err = engine.load_bundle(&handle).unwrap_err();

        assert!(matches!(err, Error::Structural { .. }));
    }

    #[test]
    fn test_payload_failure_is_structural() {
        let source = MemorySource::new();
        let handle = source.add(provider().broken_payload("corrupt archive"));
        let mut engine = test_engine(&source);

        let err = engine.load_bundle(&handle).unwrap_err();

        assert!(matches!(err, Error::Structural { .. }));
        assert!(err.to_string().contains("corrupt archive"));
        assert_eq!(engine.registry().bundle_count(), 0);
    }

    #[test]
    fn test_duplicate_bundle_name_is_rejected() {
        let source = MemorySource::new();
        source.add(provider());
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        let other = source.add_at("mem://elsewhere", provider());
        let err = engine.load_bundle(&other).unwrap_err();

        assert!(matches!(err, Error::DuplicateBundle { ref name, .. } if name == "x"));
        assert_eq!(engine.bundle("x").unwrap().origin(), &MemorySource::handle("x"));
    }

    #[test]
    fn test_duplicate_gadget_names_are_rejected() {
        let source = MemorySource::new();
        let handle = source.add(
            BundleFixture::new("x", "1.0")
                .gadget(GadgetFixture::new("same"))
                .gadget(GadgetFixture::new("same")),
        );
        let mut engine = test_engine(&source);

        let err = engine.load_bundle(&handle).unwrap_err();

        assert!(matches!(err, Error::Structural { .. }));
        assert!(engine.bundle("x").is_none());
    }

    #[test]
    fn test_loading_same_origin_twice_skips_it() {
        let source = MemorySource::new();
        source.add(provider());
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        let report = engine.load_all().unwrap().clone();

        assert!(report.activated.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(source.manifest_reads(), 1);
    }
}

mod stage_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failure_disables_dependents_but_not_bystanders() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("s", "1.0")
                .gadget(GadgetFixture::new("a").fails_at(Hook::PrePatch))
                .gadget(GadgetFixture::new("b"))
                .gadget(GadgetFixture::new("c").depends_on("a")),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.activated, vec![id("s:b")]);
        let a = report.failure_for(&id("s:a")).unwrap();
        assert_eq!(a.stage, Stage::PrePatch);
        assert!(matches!(&a.kind, FailureKind::Stage(msg) if msg.contains("pre_patch failed")));

        let c = report.failure_for(&id("s:c")).unwrap();
        assert_eq!(c.stage, Stage::PrePatch);
        assert_eq!(
            c.kind,
            FailureKind::Admission(AdmissionFailure::DependencyInactive { target: id("s:a") })
        );

        let log = source.log();
        assert_eq!(log.gadgets_for("pre_patch"), vec!["s:a", "s:b"]);
        assert_eq!(log.gadgets_for("initialize"), vec!["s:b"]);
    }

    #[test]
    fn test_config_failure_disables_gadget() {
        let source = MemorySource::new();
        source.add(provider());
        let mut engine = LoadOrderEngine::builder(source.clone())
            .config_store(MemoryConfigStore::new().with_invalid(id("x:x1"), "missing key 'rate'"))
            .build()
            .unwrap();

        let report = engine.load_all().unwrap().clone();

        let failure = report.failure_for(&id("x:x1")).unwrap();
        assert_eq!(failure.stage, Stage::Config);
        assert!(failure.to_string().contains("missing key 'rate'"));
        assert!(source.log().gadgets_for("load_config").is_empty());
    }

    #[test]
    fn test_patch_error_leaves_no_residue() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("p", "1.0").gadget(
                GadgetFixture::new("p1")
                    .patches("Player.Hit")
                    .patches("Player.Heal")
                    .registers("command", "heal"),
            ),
        );
        let mut engine = LoadOrderEngine::builder(source.clone())
            .interception(FlakyInterception::new().fail_gadget("p1"))
            .build()
            .unwrap();

        let report = engine.load_all().unwrap().clone();

        let p1 = id("p:p1");
        assert_eq!(engine.state_of(&p1), Some(GadgetState::Disabled));
        assert_eq!(report.failure_for(&p1).unwrap().stage, Stage::Patch);
        assert!(engine.interception().installed_points().is_empty());
        assert!(engine.extensions().entries_from(&p1).is_empty());
        assert!(source.log().gadgets_for("register").is_empty());
    }

    #[test]
    fn test_point_failures_are_counted_not_fatal() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("p", "1.0").gadget(
                GadgetFixture::new("p1")
                    .patches("Player.Hit")
                    .patches("Player.Heal")
                    .patches("Player.Jump"),
            ),
        );
        let mut engine = LoadOrderEngine::builder(source.clone())
            .interception(
                FlakyInterception::with_known_points(["Player.Hit", "Player.Heal"])
                    .fail_point("Player.Heal"),
            )
            .build()
            .unwrap();

        let report = engine.load_all().unwrap().clone();

        let stats = report.patch_stats[&id("p:p1")];
        assert_eq!(stats.patched, 1);
        assert_eq!(stats.skipped_error, 1);
        assert_eq!(stats.skipped_missing, 1);
        assert_eq!(engine.gadget(&id("p:p1")).unwrap().patch_stats(), stats);
        assert!(report.was_activated(&id("p:p1")));
    }

    #[test]
    fn test_register_failure_removes_partial_entries() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("r", "1.0").gadget(
                GadgetFixture::new("r1")
                    .patches("World.Tick")
                    .registers("command", "spawn")
                    .registers("command", "despawn")
                    .fails_at(Hook::Register),
            ),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        let r1 = id("r:r1");
        assert_eq!(report.failure_for(&r1).unwrap().stage, Stage::Register);
        assert!(engine.extensions().entries_from(&r1).is_empty());
        assert!(engine.interception().installed_points().is_empty());
    }

    #[test]
    fn test_duplicate_registration_fails_the_later_gadget() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("a", "1.0").gadget(GadgetFixture::new("a1").registers("command", "go")),
        );
        source.add(
            BundleFixture::new("b", "1.0").gadget(GadgetFixture::new("b1").registers("command", "go")),
        );
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.activated, vec![id("a:a1")]);
        assert_eq!(report.failure_for(&id("b:b1")).unwrap().stage, Stage::Register);
        assert_eq!(engine.extensions().entries_from(&id("a:a1")).len(), 1);
        assert!(engine.extensions().entries_from(&id("b:b1")).is_empty());
    }

    #[test]
    fn test_initialize_failure_unwinds_everything() {
        let source = MemorySource::new();
        source.add(
            BundleFixture::new("i", "1.0").gadget(
                GadgetFixture::new("i1")
                    .patches("World.Tick")
                    .registers("item", "sword")
                    .fails_at(Hook::Initialize),
            ),
        );
        let mut engine = test_engine(&source);

        engine.load_all().unwrap();

        let i1 = id("i:i1");
        assert_eq!(engine.state_of(&i1), Some(GadgetState::Disabled));
        assert!(engine.extensions().entries_from(&i1).is_empty());
        assert!(engine.interception().installed_points().is_empty());
        // Initialize never completed, so there is nothing to uninitialize
        assert!(source.log().gadgets_for("uninitialize").is_empty());
    }
}

mod conflict_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_circuit_against_plain_override_is_one_conflict() {
        let source = MemorySource::new();
        source.add(BundleFixture::new("a", "1.0").gadget(GadgetFixture::new("a1").short_circuits("Player.Hit")));
        source.add(BundleFixture::new("b", "1.0").gadget(GadgetFixture::new("b1").patches("Player.Hit")));
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(report.conflicts.pair_count(), 1);
        let point = report.conflicts.for_point("Player.Hit").unwrap();
        assert_eq!(point.pairs[0].overriding, id("a:a1"));
        assert_eq!(point.pairs[0].other, id("b:b1"));
        // Conflicts are reported, not fatal
        assert_eq!(report.activated.len(), 2);
        assert_eq!(engine.list_conflicts(), report.conflicts);
    }

    #[test]
    fn test_priority_resolves_conflict() {
        let mut urgent = DeclaredPatch::new("Player.Hit").short_circuiting();
        urgent.hints.priority = 10;
        let source = MemorySource::new();
        source.add(BundleFixture::new("a", "1.0").gadget(GadgetFixture::new("a1").with_patch(urgent)));
        source.add(BundleFixture::new("b", "1.0").gadget(GadgetFixture::new("b1").patches("Player.Hit")));
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_declared_override_resolves_conflict() {
        let mut replacing = DeclaredPatch::new("Player.Hit").short_circuiting();
        replacing.hints.overrides = vec!["b1".to_string()];
        let source = MemorySource::new();
        source.add(BundleFixture::new("a", "1.0").gadget(GadgetFixture::new("a1").with_patch(replacing)));
        source.add(BundleFixture::new("b", "1.0").gadget(GadgetFixture::new("b1").patches("Player.Hit")));
        let mut engine = test_engine(&source);

        engine.load_all().unwrap();

        assert!(engine.list_conflicts().is_empty());
    }

    #[test]
    fn test_unloading_contributor_clears_conflict() {
        let source = MemorySource::new();
        source.add(BundleFixture::new("a", "1.0").gadget(GadgetFixture::new("a1").short_circuits("Player.Hit")));
        source.add(BundleFixture::new("b", "1.0").gadget(GadgetFixture::new("b1").patches("Player.Hit")));
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        engine.unload("b").unwrap();

        assert!(engine.list_conflicts().is_empty());
    }
}
