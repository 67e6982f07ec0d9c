//! Recommend service scenario tests
//!
//! Drives the recommend task service over real user/order bundle files,
//! with recording matrices and a controllable similarity collaborator.

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vireo_core::traits::{ItemIdResolver, RecommendMatrix, UpdateRecommendBase};
use vireo_core::{CollectionConfig, ItemId};
use vireo_engine::memstore::{MemItemResolver, MemRecommendBase, RecordingMatrix};
use vireo_engine::recommend::stores::UserProfile;
use vireo_engine::{
    DirectoryRotator, OrderItem, RateRequest, RecommendMatrices, RecommendSchema,
    RecommendTaskService,
};

struct Env {
    _tmp: TempDir,
    config: Arc<CollectionConfig>,
    resolver: Arc<MemItemResolver>,
    base: Arc<MemRecommendBase>,
    visit_matrix: Arc<RecordingMatrix>,
    covisit_matrix: Arc<RecordingMatrix>,
    service: Arc<RecommendTaskService>,
    seq: std::cell::Cell<u32>,
}

fn env_with(
    cron: &str,
    resolver: Arc<dyn ItemIdResolver>,
    mem_resolver: Arc<MemItemResolver>,
) -> Env {
    let tmp = TempDir::new().unwrap();
    let mut config = CollectionConfig::for_collection("c", tmp.path());
    config.cron = cron.to_string();
    config.freq_item_sets = true;
    fs::create_dir_all(&config.user_bundle_dir).unwrap();
    fs::create_dir_all(&config.order_bundle_dir).unwrap();
    let config = Arc::new(config);

    let rotator = Arc::new(DirectoryRotator::open(tmp.path().join("data")).unwrap());
    let base = Arc::new(MemRecommendBase::new());
    let visit_matrix = Arc::new(RecordingMatrix::new());
    let purchase_matrix = Arc::new(RecordingMatrix::new());
    let covisit_matrix = Arc::new(RecordingMatrix::new());

    let service = RecommendTaskService::new(
        Arc::clone(&config),
        rotator,
        RecommendSchema::new(vec!["gender".to_string(), "age".to_string()]),
        resolver,
        Arc::clone(&base) as Arc<dyn UpdateRecommendBase>,
        RecommendMatrices {
            visit: Arc::clone(&visit_matrix) as Arc<dyn RecommendMatrix>,
            purchase: Arc::clone(&purchase_matrix) as Arc<dyn RecommendMatrix>,
            purchase_covisit: Arc::clone(&covisit_matrix) as Arc<dyn RecommendMatrix>,
        },
    )
    .unwrap();

    Env {
        _tmp: tmp,
        config,
        resolver: mem_resolver,
        base,
        visit_matrix,
        covisit_matrix,
        service: Arc::new(service),
        seq: std::cell::Cell::new(0),
    }
}

fn env() -> Env {
    let resolver = Arc::new(MemItemResolver::new());
    env_with(
        "* * * * *",
        Arc::clone(&resolver) as Arc<dyn ItemIdResolver>,
        resolver,
    )
}

impl Env {
    fn write_user_bundle(&self, type_tag: char, body: &str) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let name = format!("B-{:02}-202608020900-00000-{}-c.SCD", seq, type_tag);
        fs::write(self.config.user_bundle_dir.join(name), body).unwrap();
    }

    fn write_order_bundle(&self, type_tag: char, body: &str) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let name = format!("B-{:02}-202608020900-00000-{}-c.SCD", seq, type_tag);
        fs::write(self.config.order_bundle_dir.join(name), body).unwrap();
    }

    fn order_item(&self, item: &str) -> OrderItem {
        OrderItem {
            item: item.to_string(),
            ..Default::default()
        }
    }
}

#[test]
fn user_bundles_dispatch_by_type() {
    let env = env();
    env.write_user_bundle('I', "<USERID>u1\n<gender>F\n<USERID>u2\n<age>30\n");
    env.write_user_bundle('U', "<USERID>u1\n<gender>M\n");
    env.write_user_bundle('D', "<USERID>u2\n");

    assert!(env.service.build_collection());

    let users = &env.service.stores().user;
    assert_eq!(users.len(), 1);
    assert_eq!(
        users.get("u1").unwrap().properties.get("gender"),
        Some(&"M".to_string())
    );
    assert!(users.get("u2").is_none());
}

#[test]
fn unknown_user_property_skips_the_record() {
    let env = env();
    env.write_user_bundle('I', "<USERID>u1\n<occupation>cook\n<USERID>u2\n<age>30\n");
    assert!(env.service.build_collection());
    let users = &env.service.stores().user;
    assert!(users.get("u1").is_none());
    assert!(users.get("u2").is_some());
}

#[test]
fn order_map_overflow_flushes_and_persists_everything() {
    let env = env();

    // 1500 orders with 1500 distinct order ids forces at least one
    // intermediate flush at the 1000-order staging bound.
    let mut body = String::new();
    for i in 0..1500 {
        body.push_str(&format!(
            "<USERID>user-{}\n<ITEMID>item-{}\n<ORDERID>order-{}\n",
            i, i, i
        ));
    }
    env.write_order_bundle('I', &body);

    assert!(env.service.build_collection());

    assert_eq!(env.service.stores().order.order_count(), 1500);
    // Every order correlated through the bulk co-visit channel.
    assert_eq!(env.covisit_matrix.update_count(), 1500);
    // The similarity matrix was rebuilt and flushed at end of build.
    assert_eq!(env.base.build_count(), 1);
    assert_eq!(env.base.matrix_flush_count(), 1);
}

#[test]
fn orders_without_an_order_id_write_through_immediately() {
    let env = env();
    env.write_order_bundle(
        'I',
        "<USERID>u1\n<ITEMID>a\n<USERID>u1\n<ITEMID>b\n<ORDERID>o1\n",
    );
    assert!(env.service.build_collection());

    assert_eq!(env.service.stores().order.order_count(), 2);
    let a = env.resolver.register("a");
    let b = env.resolver.register("b");
    let updates = env.covisit_matrix.updates();
    // The singleton wrote through first; the staged order followed at
    // end of file.
    assert_eq!(updates[0], (vec![], vec![a]));
    assert_eq!(updates[1], (vec![a], vec![b]));
}

#[test]
fn non_insert_order_bundles_are_rejected() {
    let env = env();
    env.write_order_bundle('U', "<USERID>u1\n<ITEMID>a\n");
    assert!(env.service.build_collection());
    assert_eq!(env.service.stores().order.order_count(), 0);
}

#[test]
fn unresolvable_item_aborts_the_order() {
    let resolver = Arc::new(MemItemResolver::new());
    resolver.register("known");
    resolver.reject_unknown.store(true, Ordering::Relaxed);
    let env = env_with(
        "* * * * *",
        Arc::clone(&resolver) as Arc<dyn ItemIdResolver>,
        resolver,
    );

    env.write_order_bundle(
        'I',
        "<USERID>u1\n<ITEMID>known\n<ORDERID>o1\n<USERID>u2\n<ITEMID>ghost\n<ORDERID>o2\n",
    );
    assert!(env.service.build_collection());
    assert_eq!(env.service.stores().order.order_count(), 1);
}

#[test]
fn purchase_records_query_clicks() {
    let env = env();
    let mut shoes = env.order_item("sneaker");
    shoes.query = "running shoes".to_string();
    let plain = env.order_item("socks");

    assert!(env.service.purchase_item("u1", "o1", &[shoes, plain]));

    let sneaker_id = env.resolver.register("sneaker");
    let clicks = env.service.stores().query_purchase.get("running shoes");
    assert_eq!(clicks.get(&sneaker_id), Some(&1));
}

#[test]
fn visit_requires_a_session_and_feeds_the_covisit_matrix() {
    let env = env();
    assert!(!env.service.visit_item("", "u1", "a", false));

    assert!(env.service.visit_item("s1", "u1", "a", false));
    assert!(env.service.visit_item("s1", "u1", "b", true));

    let a = env.resolver.register("a");
    let b = env.resolver.register("b");
    assert_eq!(
        env.visit_matrix.updates(),
        vec![(vec![], vec![a]), (vec![a], vec![b])]
    );
    assert!(env.service.stores().visit.rec_items("u1").contains(&b));
}

#[test]
fn cart_event_and_rate_operations() {
    let env = env();
    let items = [env.order_item("a"), env.order_item("b")];
    assert!(env.service.update_cart("u1", &items));
    let a = env.resolver.register("a");
    assert!(env.service.stores().cart.get_cart("u1").contains(&a));

    assert!(env.service.track_event(true, "wish", "u1", "a"));
    assert!(env.service.track_event(false, "wish", "u1", "a"));
    assert!(!env.service.track_event(false, "wish", "u1", "a"));

    assert!(env.service.rate_item(&RateRequest {
        user: "u1".to_string(),
        item: "a".to_string(),
        rate: 5,
        is_add: true,
    }));
    assert_eq!(env.service.stores().rate.get("u1", a), Some(5));
}

/// Resolver that sleeps per lookup, stretching the bulk build long enough
/// for cron ticks to land while the build mutex is held.
struct SlowResolver {
    inner: Arc<MemItemResolver>,
    delay: Duration,
}

impl ItemIdResolver for SlowResolver {
    fn resolve(&self, item: &str) -> Option<ItemId> {
        std::thread::sleep(self.delay);
        self.inner.resolve(item)
    }
}

#[test]
fn cron_ticks_during_a_build_mutate_nothing() {
    let mem_resolver = Arc::new(MemItemResolver::new());
    let slow = Arc::new(SlowResolver {
        inner: Arc::clone(&mem_resolver),
        delay: Duration::from_millis(5),
    });
    let env = env_with(
        "* * * * *",
        slow as Arc<dyn ItemIdResolver>,
        mem_resolver,
    );

    let mut body = String::new();
    for i in 0..100 {
        body.push_str(&format!("<USERID>u\n<ITEMID>item-{}\n<ORDERID>o-{}\n", i, i));
    }
    env.write_order_bundle('I', &body);

    let service = Arc::clone(&env.service);
    let build_thread = std::thread::spawn(move || service.build_collection());

    // Give the build time to take the mutex, then fire ticks into it.
    std::thread::sleep(Duration::from_millis(50));
    for _ in 0..3 {
        env.service.cron_tick();
        std::thread::sleep(Duration::from_millis(20));
    }
    // No tick flushed the matrix while the build was running.
    assert_eq!(env.base.matrix_flush_count(), 0);

    assert!(build_thread.join().unwrap());
    // Exactly the build's own rebuild/flush happened.
    assert_eq!(env.base.build_count(), 1);
    assert_eq!(env.base.matrix_flush_count(), 1);

    // Idle ticks flush again, and rebuild only when the matrix is stale.
    env.service.cron_tick();
    assert_eq!(env.base.matrix_flush_count(), 2);
    assert_eq!(env.base.build_count(), 1);

    env.base.stale.store(true, Ordering::Relaxed);
    env.service.cron_tick();
    assert_eq!(env.base.build_count(), 2);
}

#[test]
fn cron_that_never_matches_does_not_flush() {
    // 29 February on a Monday at 00:00 is as close to "never" as cron gets.
    let resolver = Arc::new(MemItemResolver::new());
    let env = env_with(
        "0 0 29 2 1",
        Arc::clone(&resolver) as Arc<dyn ItemIdResolver>,
        resolver,
    );
    env.service.cron_tick();
    assert_eq!(env.base.matrix_flush_count(), 0);
}

#[test]
fn ticker_drives_the_cron_callback() {
    let env = env();
    env.service.start_cron_with_period(Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(60));
    env.service.stop_cron();
    // The "* * * * *" expression matches every tick; flushes accumulated.
    assert!(env.base.matrix_flush_count() >= 1);
}
