//! Multi-bundle scenarios across modkit-graph and modkit-core

use modkit_core::{GadgetId, GadgetState, Toggle, TreeNode};
use modkit_graph::TopologicalSorter;
use modkit_test_utils::{BundleFixture, GadgetFixture, MemorySource, test_engine};
use pretty_assertions::assert_eq;

fn id(qualified: &str) -> GadgetId {
    GadgetId::parse(qualified).unwrap()
}

/// `base` <- `left`, `right` <- `top`, listed in reverse.
fn diamond() -> MemorySource {
    let source = MemorySource::new();
    source.add(
        BundleFixture::new("top", "1.0").gadget(
            GadgetFixture::new("t")
                .depends_on("l")
                .depends_on("r")
                .registers("screen", "hud"),
        ),
    );
    source.add(BundleFixture::new("right", "1.0").gadget(GadgetFixture::new("r").depends_on("b")));
    source.add(BundleFixture::new("left", "1.0").gadget(GadgetFixture::new("l").depends_on("b")));
    source.add(
        BundleFixture::new("base", "1.0")
            .gadget(GadgetFixture::new("b").patches("World.Tick").registers("service", "time")),
    );
    source
}

mod ordering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_diamond_waits_for_every_parent() {
        let source = diamond();
        let mut engine = test_engine(&source);

        let report = engine.load_all().unwrap().clone();

        assert_eq!(
            report.activated,
            vec![id("base:b"), id("right:r"), id("left:l"), id("top:t")]
        );
        let top = engine.node_of(&id("top:t")).unwrap();
        assert_eq!(engine.tree().parents(top).len(), 2);
    }

    #[test]
    fn test_engine_order_agrees_with_topological_sort() {
        let source = diamond();
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        let mut sorter = TopologicalSorter::new();
        for gadget in engine.registry().gadgets() {
            sorter.add_node(gadget.id().clone());
            for dep in gadget.dependencies() {
                let target = engine.registry().resolve(&dep.target).unwrap();
                sorter.add_edge(target, gadget.id().clone());
            }
        }
        let expected = sorter.sort().unwrap();
        let order = engine.load_order();

        let position = |list: &[GadgetId], g: &GadgetId| list.iter().position(|x| x == g).unwrap();
        for gadget in engine.registry().gadgets() {
            for dep in gadget.dependencies() {
                let target = engine.registry().resolve(&dep.target).unwrap();
                assert!(position(&order, &target) < position(&order, gadget.id()));
                assert!(position(&expected, &target) < position(&expected, gadget.id()));
            }
        }
        assert_eq!(order.len(), expected.len());
    }

    #[test]
    fn test_tree_root_holds_only_independent_gadgets() {
        let source = diamond();
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        let roots: Vec<&TreeNode> = engine
            .tree()
            .children(engine.tree_root())
            .iter()
            .filter_map(|&n| engine.tree().value(n))
            .collect();

        assert_eq!(roots, vec![&TreeNode::Gadget(id("base:b"))]);
    }
}

mod churn {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repeated_unload_and_load_leaves_no_residue() {
        let source = diamond();
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        for _ in 0..3 {
            let unloaded = engine.unload("base").unwrap();
            assert_eq!(unloaded.len(), 4);
            assert_eq!(engine.registry().gadget_count(), 0);
            assert!(engine.registry().active().is_empty());
            assert!(engine.interception().installed_points().is_empty());
            assert!(engine.extensions().entries_from(&id("base:b")).is_empty());
            assert!(engine.extensions().entries_from(&id("top:t")).is_empty());

            let report = engine.load_all().unwrap().clone();
            assert_eq!(report.activated.len(), 4);
        }

        assert_eq!(engine.extensions().entries_from(&id("top:t")).len(), 1);
        assert_eq!(engine.interception().installed_points().len(), 1);
    }

    #[test]
    fn test_disable_one_branch_keeps_the_other() {
        let source = diamond();
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();

        engine.set_enabled(&Toggle::Gadget(id("left:l")), false).unwrap();

        assert!(engine.is_active(&id("base:b")));
        assert!(engine.is_active(&id("right:r")));
        assert_eq!(engine.state_of(&id("left:l")), Some(GadgetState::Disabled));
        assert_eq!(engine.state_of(&id("top:t")), Some(GadgetState::Disabled));

        engine.set_enabled(&Toggle::Gadget(id("left:l")), true).unwrap();

        assert_eq!(engine.registry().active().len(), 4);
    }

    #[test]
    fn test_refresh_base_redrives_everything_once() {
        let source = diamond();
        let mut engine = test_engine(&source);
        engine.load_all().unwrap();
        source.log().clear();

        engine.refresh("base").unwrap();

        let log = source.log();
        assert_eq!(
            log.gadgets_for("uninitialize"),
            vec!["top:t", "left:l", "right:r", "base:b"]
        );
        assert_eq!(
            log.gadgets_for("initialize"),
            vec!["base:b", "right:r", "left:l", "top:t"]
        );
    }
}
