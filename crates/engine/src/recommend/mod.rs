//! Recommend task service
//!
//! The parallel ingestion pipeline next to the index worker: it maintains
//! user profiles and visit/purchase/cart/event/rate streams, bulk-ingests
//! user and order bundles, and keeps the item-item similarity matrix fed
//! through the [`RecommendMatrix`] channels.
//!
//! Bulk builds hold `build_mutex` for their whole duration. The cron tick
//! fires every 60 seconds, evaluates the configured cron expression, and
//! uses a non-blocking try-lock: while a build is in progress the tick
//! logs and exits without touching any store.

pub mod cron;
pub mod stores;

use crate::bundle::parser::{BundleReader, RecordDelimiter};
use crate::bundle::scan::{backup_bundle_files, scan_bundle_dir};
use crate::bundle::{BundleFile, BundleType};
use crate::directory::{DirectoryGuard, DirectoryRotator};
use self::cron::{CronExpression, CronTicker};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use self::stores::{
    CartStore, EventStore, OrderStore, PurchaseStore, QueryPurchaseCounter, RateStore,
    UserProfile, UserStore, VisitStore,
};
use tracing::{error, info, warn};
use vireo_core::traits::{ItemIdResolver, RecommendMatrix, UpdateRecommendBase};
use vireo_core::{
    CancellationToken, CollectionConfig, EngineError, EngineResult, ItemId, RawDoc,
};

/// Max number of distinct orders staged in the order map before a flush.
pub const MAX_ORDER_NUM: usize = 1000;

const PROP_USERID: &str = "USERID";
const PROP_ITEMID: &str = "ITEMID";
const PROP_ORDERID: &str = "ORDERID";
const PROP_DATE: &str = "DATE";
const PROP_QUANTITY: &str = "quantity";
const PROP_PRICE: &str = "price";
const PROP_QUERY: &str = "query";

/// One line of an order: the purchased item plus its optional metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderItem {
    /// External item string.
    pub item: String,
    /// Order date string as it appeared in the bundle.
    pub date: String,
    /// Purchased quantity, when parseable.
    pub quantity: Option<i64>,
    /// Item price, when parseable.
    pub price: Option<f64>,
    /// The search query that led to this purchase, when present.
    pub query: String,
}

/// Parameters of a rating mutation.
#[derive(Debug, Clone)]
pub struct RateRequest {
    /// External user id.
    pub user: String,
    /// External item string.
    pub item: String,
    /// Star rating.
    pub rate: u8,
    /// `true` to add/replace, `false` to remove.
    pub is_add: bool,
}

/// Declared user-profile properties; everything else in a user bundle is a
/// schema violation.
#[derive(Debug, Clone, Default)]
pub struct RecommendSchema {
    user_properties: HashSet<String>,
}

impl RecommendSchema {
    /// Build from the declared user property names.
    pub fn new(properties: impl IntoIterator<Item = String>) -> Self {
        RecommendSchema {
            user_properties: properties
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    fn is_user_property(&self, name: &str) -> bool {
        self.user_properties.contains(&name.to_lowercase())
    }
}

/// The three co-occurrence channels the service feeds.
pub struct RecommendMatrices {
    /// Session co-visit channel.
    pub visit: Arc<dyn RecommendMatrix>,
    /// Online purchase channel.
    pub purchase: Arc<dyn RecommendMatrix>,
    /// Bulk order-ingest channel.
    pub purchase_covisit: Arc<dyn RecommendMatrix>,
}

/// The recommend sub-stores as one openable bundle.
pub struct RecommendStores {
    /// User profiles.
    pub user: UserStore,
    /// Visit streams.
    pub visit: VisitStore,
    /// Purchase sets.
    pub purchase: PurchaseStore,
    /// Shopping carts.
    pub cart: CartStore,
    /// Order log.
    pub order: OrderStore,
    /// Event streams.
    pub event: EventStore,
    /// Ratings.
    pub rate: RateStore,
    /// Query → purchase counter.
    pub query_purchase: QueryPurchaseCounter,
}

impl RecommendStores {
    /// Open every sub-store under `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(RecommendStores {
            user: UserStore::open(dir)?,
            visit: VisitStore::open(dir)?,
            purchase: PurchaseStore::open(dir)?,
            cart: CartStore::open(dir)?,
            order: OrderStore::open(dir)?,
            event: EventStore::open(dir)?,
            rate: RateStore::open(dir)?,
            query_purchase: QueryPurchaseCounter::open(dir)?,
        })
    }
}

type OrderKey = (String, String);
type OrderMap = HashMap<OrderKey, Vec<OrderItem>>;

/// User/order ingestion and similarity-matrix upkeep for one collection.
pub struct RecommendTaskService {
    config: Arc<CollectionConfig>,
    rotator: Arc<DirectoryRotator>,
    schema: RecommendSchema,
    stores: RecommendStores,
    resolver: Arc<dyn ItemIdResolver>,
    base: Arc<dyn UpdateRecommendBase>,
    matrices: RecommendMatrices,
    build_mutex: Mutex<()>,
    cron: CronExpression,
    ticker: Mutex<Option<CronTicker>>,
    cancel: CancellationToken,
}

impl RecommendTaskService {
    /// Wire the service to its stores and collaborators.
    ///
    /// Sub-stores open under the current data directory, so directory
    /// backups cover them. The configured cron expression is validated
    /// here.
    pub fn new(
        config: Arc<CollectionConfig>,
        rotator: Arc<DirectoryRotator>,
        schema: RecommendSchema,
        resolver: Arc<dyn ItemIdResolver>,
        base: Arc<dyn UpdateRecommendBase>,
        matrices: RecommendMatrices,
    ) -> EngineResult<Self> {
        let cron = CronExpression::parse(&config.cron)?;
        let stores = RecommendStores::open(rotator.current().path())?;
        Ok(RecommendTaskService {
            config,
            rotator,
            schema,
            stores,
            resolver,
            base,
            matrices,
            build_mutex: Mutex::new(()),
            cron,
            ticker: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// The service's sub-stores (read access for queries and tests).
    pub fn stores(&self) -> &RecommendStores {
        &self.stores
    }

    /// A clone of the service's cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ========================================================================
    // User lifecycle
    // ========================================================================

    /// Add a user profile. `false` when the id already exists.
    pub fn add_user(&self, user: UserProfile) -> bool {
        self.stores.user.add_user(user)
    }

    /// Replace a user profile. `false` when the id is unknown.
    pub fn update_user(&self, user: UserProfile) -> bool {
        self.stores.user.update_user(user)
    }

    /// Remove a user profile. `false` when the id is unknown.
    pub fn remove_user(&self, user_id: &str) -> bool {
        self.stores.user.remove_user(user_id)
    }

    // ========================================================================
    // Event streams
    // ========================================================================

    /// Record an item visit within a session. Requires a non-empty session
    /// id; when `is_rec_item` is set the recommended-visit counter is
    /// updated too.
    pub fn visit_item(&self, session: &str, user: &str, item: &str, is_rec_item: bool) -> bool {
        if session.is_empty() {
            error!(target: "vireo::recommend", "visit rejected: session id is empty");
            return false;
        }
        let Some(item_id) = self.resolver.resolve(item) else {
            return false;
        };
        if !self
            .stores
            .visit
            .add_visit(session, user, item_id, Some(&*self.matrices.visit))
        {
            return false;
        }
        if is_rec_item && !self.stores.visit.visit_rec_item(user, item_id) {
            error!(
                target: "vireo::recommend",
                user, item_id, "failed to count recommended-item visit"
            );
            return false;
        }
        true
    }

    /// Record an order through the online purchase channel.
    pub fn purchase_item(&self, user: &str, order_id: &str, items: &[OrderItem]) -> bool {
        self.save_order(user, order_id, items, &*self.matrices.purchase)
    }

    /// Replace a user's shopping cart.
    pub fn update_cart(&self, user: &str, items: &[OrderItem]) -> bool {
        let Some(item_ids) = self.resolve_items(items) else {
            return false;
        };
        self.stores.cart.update_cart(user, item_ids)
    }

    /// Attach or detach an event item for a user.
    pub fn track_event(&self, is_add: bool, event: &str, user: &str, item: &str) -> bool {
        let Some(item_id) = self.resolver.resolve(item) else {
            return false;
        };
        if is_add {
            self.stores.event.add_event(event, user, item_id)
        } else {
            self.stores.event.remove_event(event, user, item_id)
        }
    }

    /// Add or remove a rating.
    pub fn rate_item(&self, request: &RateRequest) -> bool {
        let Some(item_id) = self.resolver.resolve(&request.item) else {
            return false;
        };
        if request.is_add {
            self.stores.rate.add_rate(&request.user, item_id, request.rate)
        } else {
            self.stores.rate.remove_rate(&request.user, item_id)
        }
    }

    // ========================================================================
    // Bulk build
    // ========================================================================

    /// Bulk-ingest the user and order bundle directories.
    pub fn build_collection(&self) -> bool {
        info!(
            target: "vireo::recommend",
            collection = %self.config.collection,
            "start building recommend collection"
        );

        if let Err(e) = self.rotator.backup_current() {
            error!(
                target: "vireo::recommend",
                error = %e,
                "failed to back up data files, exit recommend collection build"
            );
            return false;
        }

        let current = self.rotator.current();
        let guard = match DirectoryGuard::acquire(&current) {
            Ok(guard) => guard,
            Err(e) => {
                error!(
                    target: "vireo::recommend",
                    error = %e,
                    "dirty recommend collection data, exit recommend collection build"
                );
                return false;
            }
        };

        let _lock = self.build_mutex.lock();

        let built = self.load_user_bundles() && self.load_order_bundles();
        drop(guard);

        if built {
            info!(
                target: "vireo::recommend",
                collection = %self.config.collection,
                "end recommend collection build"
            );
        } else {
            error!(
                target: "vireo::recommend",
                collection = %self.config.collection,
                "failed recommend collection build"
            );
        }
        built
    }

    fn load_user_bundles(&self) -> bool {
        let dir = &self.config.user_bundle_dir;
        let files = match scan_bundle_dir(dir) {
            Ok(files) => files,
            Err(e) => {
                error!(target: "vireo::recommend", error = %e, "user bundle scan failed");
                return false;
            }
        };
        if files.is_empty() {
            return true;
        }

        for file in &files {
            if let Err(e) = self.parse_user_bundle(file) {
                error!(
                    target: "vireo::recommend",
                    file = %file.name.as_str(),
                    error = %e,
                    "user bundle aborted"
                );
            }
        }

        if let Err(e) = self.stores.user.flush() {
            warn!(target: "vireo::recommend", error = %e, "user store flush failed");
        }
        backup_bundle_files(dir, &files, None);
        true
    }

    fn parse_user_bundle(&self, file: &BundleFile) -> EngineResult<()> {
        info!(
            target: "vireo::recommend",
            file = %file.name.as_str(),
            "parsing user bundle"
        );
        let mut reader = BundleReader::open(&file.path, RecordDelimiter::UserId)
            .map_err(|e| EngineError::bad_format(format!("cannot open bundle: {}", e)))?;
        let bundle_type = file.name.bundle_type();

        let mut user_count = 0u64;
        while let Some(record) = reader.next_record()? {
            self.cancel.checkpoint()?;
            user_count += 1;

            let user = match self.doc_to_user(&record) {
                Ok(user) => user,
                Err(e) => {
                    error!(
                        target: "vireo::recommend",
                        record = user_count,
                        error = %e,
                        "skipping user record"
                    );
                    continue;
                }
            };

            let applied = match bundle_type {
                BundleType::Insert => self.add_user(user.clone()),
                BundleType::Update => self.update_user(user.clone()),
                BundleType::Delete => self.remove_user(&user.id),
                BundleType::Rebuild => {
                    error!(
                        target: "vireo::recommend",
                        file = %file.name.as_str(),
                        "rebuild type is not accepted for user bundles"
                    );
                    return Ok(());
                }
            };
            if !applied {
                error!(
                    target: "vireo::recommend",
                    user = %user.id,
                    op = bundle_type.label(),
                    "user mutation rejected"
                );
            }
        }
        info!(target: "vireo::recommend", users = user_count, "user bundle parsed");
        Ok(())
    }

    fn doc_to_user(&self, record: &RawDoc) -> EngineResult<UserProfile> {
        let mut user = UserProfile::default();
        for (name, value) in record {
            if name.eq_ignore_ascii_case(PROP_USERID) {
                user.id = value.clone();
            } else if self.schema.is_user_property(name) {
                user.properties.insert(name.clone(), value.clone());
            } else {
                return Err(EngineError::schema(format!(
                    "unknown user property '{}'",
                    name
                )));
            }
        }
        if user.id.is_empty() {
            return Err(EngineError::schema(format!(
                "missing user property <{}>",
                PROP_USERID
            )));
        }
        Ok(user)
    }

    fn load_order_bundles(&self) -> bool {
        let dir = &self.config.order_bundle_dir;
        let files = match scan_bundle_dir(dir) {
            Ok(files) => files,
            Err(e) => {
                error!(target: "vireo::recommend", error = %e, "order bundle scan failed");
                return false;
            }
        };
        if files.is_empty() {
            return true;
        }

        for file in &files {
            if let Err(e) = self.parse_order_bundle(file) {
                error!(
                    target: "vireo::recommend",
                    file = %file.name.as_str(),
                    error = %e,
                    "order bundle aborted"
                );
            }
        }

        if let Err(e) = self.stores.order.flush() {
            warn!(target: "vireo::recommend", error = %e, "order store flush failed");
        }
        if let Err(e) = self.stores.purchase.flush() {
            warn!(target: "vireo::recommend", error = %e, "purchase store flush failed");
        }

        self.build_freq_item_sets();

        if let Err(e) = self.base.build_purchase_sim_matrix() {
            error!(
                target: "vireo::recommend",
                error = %e,
                "purchase similarity matrix rebuild failed"
            );
        }
        if let Err(e) = self.base.flush_recommend_matrix() {
            error!(target: "vireo::recommend", error = %e, "recommend matrix flush failed");
        }

        backup_bundle_files(dir, &files, None);
        true
    }

    fn parse_order_bundle(&self, file: &BundleFile) -> EngineResult<()> {
        info!(
            target: "vireo::recommend",
            file = %file.name.as_str(),
            "parsing order bundle"
        );
        if file.name.bundle_type() != BundleType::Insert {
            return Err(EngineError::bad_format(
                "only insert type is allowed for order bundles",
            ));
        }
        let mut reader = BundleReader::open(&file.path, RecordDelimiter::UserId)
            .map_err(|e| EngineError::bad_format(format!("cannot open bundle: {}", e)))?;

        let mut order_map: OrderMap = OrderMap::new();
        let mut order_count = 0u64;
        while let Some(record) = reader.next_record()? {
            self.cancel.checkpoint()?;
            order_count += 1;

            let (user, order_id, item) = match doc_to_order(&record) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!(
                        target: "vireo::recommend",
                        record = order_count,
                        error = %e,
                        "skipping order record"
                    );
                    continue;
                }
            };
            self.load_order_item(user, order_id, item, &mut order_map);
        }

        // Every staged order is written out before the file finishes.
        self.save_order_map(&order_map);
        info!(target: "vireo::recommend", orders = order_count, "order bundle parsed");
        Ok(())
    }

    /// Stage one order line; orders without an order id write through
    /// immediately as singletons, and a full map flushes wholesale.
    fn load_order_item(
        &self,
        user: String,
        order_id: String,
        item: OrderItem,
        order_map: &mut OrderMap,
    ) {
        debug_assert!(!user.is_empty());

        if order_id.is_empty() {
            self.save_order(&user, &order_id, &[item], &*self.matrices.purchase_covisit);
            return;
        }

        let key = (user, order_id);
        if let Some(items) = order_map.get_mut(&key) {
            items.push(item);
            return;
        }
        if order_map.len() >= MAX_ORDER_NUM {
            self.save_order_map(order_map);
            order_map.clear();
        }
        order_map.entry(key).or_default().push(item);
    }

    fn save_order_map(&self, order_map: &OrderMap) {
        for ((user, order_id), items) in order_map {
            self.save_order(user, order_id, items, &*self.matrices.purchase_covisit);
        }
    }

    /// Persist one order: order log, purchase link, query-purchase counts.
    /// Each of the three is attempted even when another fails; the saved
    /// flag is the conjunction.
    fn save_order(
        &self,
        user: &str,
        order_id: &str,
        items: &[OrderItem],
        matrix: &dyn RecommendMatrix,
    ) -> bool {
        if items.is_empty() {
            warn!(target: "vireo::recommend", user, "empty order");
            return false;
        }
        let Some(item_ids) = self.resolve_items(items) else {
            return false;
        };

        let mut saved = self.stores.order.add_order(item_ids.clone());
        if !self
            .stores
            .purchase
            .add_purchase(user, &item_ids, Some(matrix))
        {
            saved = false;
        }
        if !self.insert_purchase_counter(items, &item_ids) {
            saved = false;
        }

        if !saved {
            error!(
                target: "vireo::recommend",
                user,
                order_id,
                item_count = item_ids.len(),
                "failed to save order"
            );
        }
        saved
    }

    fn insert_purchase_counter(&self, items: &[OrderItem], item_ids: &[ItemId]) -> bool {
        let mut result = true;
        for (item, &item_id) in items.iter().zip(item_ids) {
            if item.query.is_empty() {
                continue;
            }
            if !self.stores.query_purchase.click(&item.query, item_id) {
                result = false;
            }
        }
        result
    }

    /// Resolve every item string of an order; any failure aborts the order.
    fn resolve_items(&self, items: &[OrderItem]) -> Option<Vec<ItemId>> {
        let mut item_ids = Vec::with_capacity(items.len());
        for item in items {
            match self.resolver.resolve(&item.item) {
                Some(id) => item_ids.push(id),
                None => {
                    error!(
                        target: "vireo::recommend",
                        item = %item.item,
                        "cannot resolve item id, order aborted"
                    );
                    return None;
                }
            }
        }
        Some(item_ids)
    }

    fn build_freq_item_sets(&self) {
        if !self.config.freq_item_sets {
            return;
        }
        info!(
            target: "vireo::recommend",
            collection = %self.config.collection,
            "building frequent item sets"
        );
        self.stores.order.build_freq_item_sets();
    }

    // ========================================================================
    // Cron
    // ========================================================================

    /// Start the 60-second cron tick.
    pub fn start_cron(self: &Arc<Self>) {
        self.start_cron_with_period(Duration::from_secs(60));
    }

    /// Start the cron tick with a custom period (tests).
    pub fn start_cron_with_period(self: &Arc<Self>, period: Duration) {
        // The ticker holds only a weak handle; the back-edge must not keep
        // the service alive.
        let weak = Arc::downgrade(self);
        let ticker = CronTicker::start(&self.config.collection, period, move || {
            if let Some(service) = weak.upgrade() {
                service.cron_tick();
            }
        });
        *self.ticker.lock() = Some(ticker);
    }

    /// Stop the cron tick.
    pub fn stop_cron(&self) {
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
    }

    /// One cron evaluation: on a cron match, flush everything unless a
    /// build holds the mutex, in which case the tick is skipped entirely.
    pub fn cron_tick(&self) {
        if !self.cron.matches_now() {
            return;
        }

        let Some(_lock) = self.build_mutex.try_lock() else {
            info!(
                target: "vireo::recommend",
                collection = %self.config.collection,
                "exit recommend cron job as still in building collection"
            );
            return;
        };

        self.flush_stores();
        self.build_freq_item_sets();

        if self.base.need_rebuild_purchase_sim_matrix() {
            if let Err(e) = self.base.build_purchase_sim_matrix() {
                error!(
                    target: "vireo::recommend",
                    error = %e,
                    "purchase similarity matrix rebuild failed"
                );
            }
        }
        if let Err(e) = self.base.flush_recommend_matrix() {
            error!(target: "vireo::recommend", error = %e, "recommend matrix flush failed");
        }
    }

    fn flush_stores(&self) {
        info!(
            target: "vireo::recommend",
            collection = %self.config.collection,
            "start flushing recommend data"
        );
        let flushes: [(&str, EngineResult<()>); 8] = [
            ("user", self.stores.user.flush()),
            ("visit", self.stores.visit.flush()),
            ("purchase", self.stores.purchase.flush()),
            ("cart", self.stores.cart.flush()),
            ("order", self.stores.order.flush()),
            ("event", self.stores.event.flush()),
            ("rate", self.stores.rate.flush()),
            ("query_purchase", self.stores.query_purchase.flush()),
        ];
        for (store, result) in flushes {
            if let Err(e) = result {
                warn!(target: "vireo::recommend", store, error = %e, "store flush failed");
            }
        }
        info!(
            target: "vireo::recommend",
            collection = %self.config.collection,
            "finish flushing recommend data"
        );
    }
}

impl Drop for RecommendTaskService {
    fn drop(&mut self) {
        self.stop_cron();
    }
}

/// Parse an order record into `(user, order id, order item)`.
fn doc_to_order(record: &RawDoc) -> EngineResult<(String, String, OrderItem)> {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in record {
        fields.insert(name.to_uppercase(), value.clone());
    }

    let user = fields.remove(PROP_USERID).unwrap_or_default();
    if user.is_empty() {
        return Err(EngineError::schema(format!(
            "missing property <{}> in order record",
            PROP_USERID
        )));
    }

    let mut item = OrderItem {
        item: fields.remove(PROP_ITEMID).unwrap_or_default(),
        ..Default::default()
    };
    if item.item.is_empty() {
        return Err(EngineError::schema(format!(
            "missing property <{}> in order record",
            PROP_ITEMID
        )));
    }

    let order_id = fields.remove(PROP_ORDERID).unwrap_or_default();
    item.date = fields.remove(PROP_DATE).unwrap_or_default();
    item.query = fields.remove(&PROP_QUERY.to_uppercase()).unwrap_or_default();

    if let Some(quantity) = fields.remove(&PROP_QUANTITY.to_uppercase()) {
        match quantity.parse::<i64>() {
            Ok(value) => item.quantity = Some(value),
            Err(_) => {
                warn!(
                    target: "vireo::recommend",
                    value = %quantity,
                    "cannot cast quantity to an integer"
                );
            }
        }
    }
    if let Some(price) = fields.remove(&PROP_PRICE.to_uppercase()) {
        match price.parse::<f64>() {
            Ok(value) => item.price = Some(value),
            Err(_) => {
                warn!(
                    target: "vireo::recommend",
                    value = %price,
                    "cannot cast price to a float"
                );
            }
        }
    }

    Ok((user, order_id, item))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entries: &[(&str, &str)]) -> RawDoc {
        entries
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn order_record_parses_with_lenient_numbers() {
        let (user, order_id, item) = doc_to_order(&record(&[
            ("USERID", "u1"),
            ("ITEMID", "i1"),
            ("ORDERID", "o1"),
            ("DATE", "20260801"),
            ("quantity", "3"),
            ("price", "nine"),
            ("query", "shoes"),
        ]))
        .unwrap();
        assert_eq!(user, "u1");
        assert_eq!(order_id, "o1");
        assert_eq!(item.item, "i1");
        assert_eq!(item.quantity, Some(3));
        // Unparseable price is dropped, not fatal
        assert_eq!(item.price, None);
        assert_eq!(item.query, "shoes");
    }

    #[test]
    fn order_record_requires_user_and_item() {
        assert!(doc_to_order(&record(&[("ITEMID", "i1")])).is_err());
        assert!(doc_to_order(&record(&[("USERID", "u1")])).is_err());
    }

    #[test]
    fn recommend_schema_is_case_insensitive() {
        let schema = RecommendSchema::new(vec!["gender".to_string(), "age".to_string()]);
        assert!(schema.is_user_property("Gender"));
        assert!(schema.is_user_property("AGE"));
        assert!(!schema.is_user_property("occupation"));
    }
}
