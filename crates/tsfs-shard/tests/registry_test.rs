//! Integration tests for shard placement across filesystem roots.

use std::fs;
use std::sync::Arc;

use tsfs_config::testing::TestEnvironment;
use tsfs_shard::{
    DirectoryShard, FsId, PathQuery, PrefixLocator, ShardError, ShardRegistry, SingleRootLocator,
    ENTRY_FILE,
};

fn id(s: &str) -> FsId {
    s.parse().unwrap()
}

#[test]
fn test_prefix_routes_shards_to_extra_root() {
    let env = TestEnvironment::new().unwrap();
    let registry = ShardRegistry::from_config(&env.config_with_extra_root("/pa"));

    let routed = registry.find(&id("/pa/pdc/x"), true, false).unwrap().unwrap();
    let default = registry.find(&id("/pb/x"), true, false).unwrap().unwrap();

    assert!(routed.root().starts_with(&env.extra_root));
    assert!(default.root().starts_with(&env.data_dir));
    assert!(routed.root().join(ENTRY_FILE).is_file());

    // config sizing: 64 files / 8 per dir -> next prime >= 8
    assert_eq!(routed.bin_count(), 11);
    assert_eq!(routed.level_count(), 1);
}

#[test]
fn test_enumeration_spans_roots() {
    let env = TestEnvironment::new().unwrap();
    let registry = ShardRegistry::from_config(&env.config_with_extra_root("/pa"));

    for path in ["/pa/pdc", "/pb/cal"] {
        let shard = registry
            .find(&FsId::for_path(path).unwrap(), true, false)
            .unwrap()
            .unwrap();
        fs::write(shard.path_for_id("kic1"), b"").unwrap();
    }

    let ids = registry.find_ids(&PathQuery::under("/")).unwrap();
    let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
    assert_eq!(ids, vec!["/pa/pdc/kic1", "/pb/cal/kic1"]);
}

#[test]
fn test_duplicate_identifier_across_roots_fails() {
    let env = TestEnvironment::new().unwrap();
    let routed = ShardRegistry::from_config(&env.config_with_extra_root("/pa"));
    let stray = ShardRegistry::new(Arc::new(SingleRootLocator::new(&env.data_dir)), 64, 8);

    for registry in [&routed, &stray] {
        let shard = registry.find(&id("/pa/x"), true, false).unwrap().unwrap();
        fs::write(shard.path_for_id("x"), b"").unwrap();
    }

    let locator = PrefixLocator::new(&env.data_dir).route("/pa", &env.extra_root);
    let registry = ShardRegistry::read_only(Arc::new(locator));
    assert!(matches!(
        registry.find_ids(&PathQuery::under("/pa")),
        Err(ShardError::DuplicateId(_))
    ));
}

#[test]
fn test_list_matches_inserted_ids_for_any_fan_out() {
    let env = TestEnvironment::new().unwrap();
    for max_per_dir in [2u32, 3, 7, 64] {
        let root = env.data_dir.join(format!("fan{}", max_per_dir));
        let shard = DirectoryShard::create(300, max_per_dir, &root).unwrap();
        for i in 0..120 {
            fs::write(shard.path_for_id(&format!("id{}", i)), b"").unwrap();
        }
        assert_eq!(shard.list_all_ids().unwrap().len(), 120, "fan-out {}", max_per_dir);
    }
}
