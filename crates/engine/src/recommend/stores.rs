//! Recommend sub-stores
//!
//! User, Visit, Purchase, Cart, Order, Event, Rate, and the
//! query→purchase counter. Each store is an in-memory map that snapshots
//! to disk on `flush()` through a shared magic+version blob written
//! atomically (temp + rename). Visit and Purchase optionally emit
//! co-occurrence updates to a [`RecommendMatrix`] channel as they ingest.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use vireo_core::traits::RecommendMatrix;
use vireo_core::{EngineError, EngineResult, ItemId};

/// Magic bytes for store snapshots.
const SNAPSHOT_MAGIC: &[u8; 4] = b"VSNP";
/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

fn write_snapshot<T: Serialize>(path: &Path, data: &T) -> EngineResult<()> {
    let payload = rmp_serde::to_vec(data)
        .map_err(|e| EngineError::store(format!("serialize snapshot: {}", e)))?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload);

    let tmp = path.with_extension("snap.tmp");
    std::fs::write(&tmp, &buf)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn load_snapshot<T: DeserializeOwned>(path: &Path) -> EngineResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let buf = std::fs::read(path)?;
    if buf.len() < 8 || &buf[0..4] != SNAPSHOT_MAGIC {
        return Err(EngineError::bad_format("bad snapshot header"));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().expect("length checked above"));
    if version != SNAPSHOT_VERSION {
        return Err(EngineError::bad_format(format!(
            "unsupported snapshot version {}",
            version
        )));
    }
    let data = rmp_serde::from_slice(&buf[8..])
        .map_err(|e| EngineError::bad_format(format!("decode snapshot: {}", e)))?;
    Ok(Some(data))
}

// ============================================================================
// User store
// ============================================================================

/// A recommendation user profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// External user id string.
    pub id: String,
    /// Declared profile properties.
    pub properties: BTreeMap<String, String>,
}

/// Store of user profiles.
pub struct UserStore {
    path: PathBuf,
    users: DashMap<String, UserProfile>,
}

impl UserStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("users.snap");
        let users = DashMap::new();
        if let Some(snapshot) = load_snapshot::<Vec<UserProfile>>(&path)? {
            for user in snapshot {
                users.insert(user.id.clone(), user);
            }
        }
        Ok(UserStore { path, users })
    }

    /// Add a new user. `false` when the id already exists.
    pub fn add_user(&self, user: UserProfile) -> bool {
        if self.users.contains_key(&user.id) {
            return false;
        }
        self.users.insert(user.id.clone(), user);
        true
    }

    /// Replace an existing user. `false` when the id is unknown.
    pub fn update_user(&self, user: UserProfile) -> bool {
        if !self.users.contains_key(&user.id) {
            return false;
        }
        self.users.insert(user.id.clone(), user);
        true
    }

    /// Remove a user. `false` when the id is unknown.
    pub fn remove_user(&self, id: &str) -> bool {
        self.users.remove(id).is_some()
    }

    /// Fetch a user profile.
    pub fn get(&self, id: &str) -> Option<UserProfile> {
        self.users.get(id).map(|u| u.clone())
    }

    /// Number of stored users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let mut snapshot: Vec<UserProfile> =
            self.users.iter().map(|e| e.value().clone()).collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Visit store
// ============================================================================

/// Per-session and per-user visit tracking, plus the recommended-item
/// visit counter.
pub struct VisitStore {
    path: PathBuf,
    session_items: DashMap<String, Vec<ItemId>>,
    user_items: DashMap<String, BTreeSet<ItemId>>,
    rec_items: DashMap<String, BTreeSet<ItemId>>,
}

#[derive(Serialize, Deserialize, Default)]
struct VisitSnapshot {
    session_items: BTreeMap<String, Vec<ItemId>>,
    user_items: BTreeMap<String, BTreeSet<ItemId>>,
    rec_items: BTreeMap<String, BTreeSet<ItemId>>,
}

impl VisitStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("visits.snap");
        let store = VisitStore {
            path,
            session_items: DashMap::new(),
            user_items: DashMap::new(),
            rec_items: DashMap::new(),
        };
        if let Some(snapshot) = load_snapshot::<VisitSnapshot>(&store.path)? {
            for (k, v) in snapshot.session_items {
                store.session_items.insert(k, v);
            }
            for (k, v) in snapshot.user_items {
                store.user_items.insert(k, v);
            }
            for (k, v) in snapshot.rec_items {
                store.rec_items.insert(k, v);
            }
        }
        Ok(store)
    }

    /// Record a visit. Emits a co-visit update correlating the new item
    /// against the session's previous items.
    pub fn add_visit(
        &self,
        session: &str,
        user: &str,
        item: ItemId,
        matrix: Option<&dyn RecommendMatrix>,
    ) -> bool {
        self.user_items
            .entry(user.to_string())
            .or_default()
            .insert(item);

        let mut session_entry = self.session_items.entry(session.to_string()).or_default();
        if session_entry.contains(&item) {
            return true;
        }
        if let Some(matrix) = matrix {
            matrix.update(session_entry.as_slice(), &[item]);
        }
        session_entry.push(item);
        true
    }

    /// Count a visit of a recommended item.
    pub fn visit_rec_item(&self, user: &str, item: ItemId) -> bool {
        self.rec_items
            .entry(user.to_string())
            .or_default()
            .insert(item);
        true
    }

    /// The items visited in a session, in visit order.
    pub fn session_items(&self, session: &str) -> Vec<ItemId> {
        self.session_items
            .get(session)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// The items a user has visited.
    pub fn user_items(&self, user: &str) -> BTreeSet<ItemId> {
        self.user_items
            .get(user)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// The recommended items a user has visited.
    pub fn rec_items(&self, user: &str) -> BTreeSet<ItemId> {
        self.rec_items
            .get(user)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let snapshot = VisitSnapshot {
            session_items: self
                .session_items
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            user_items: self
                .user_items
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            rec_items: self
                .rec_items
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Purchase store
// ============================================================================

/// Per-user purchased-item sets feeding the co-purchase matrix.
pub struct PurchaseStore {
    path: PathBuf,
    user_items: DashMap<String, BTreeSet<ItemId>>,
}

impl PurchaseStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("purchases.snap");
        let user_items = DashMap::new();
        if let Some(snapshot) =
            load_snapshot::<BTreeMap<String, BTreeSet<ItemId>>>(&path)?
        {
            for (k, v) in snapshot {
                user_items.insert(k, v);
            }
        }
        Ok(PurchaseStore { path, user_items })
    }

    /// Record a purchase of `items` by `user`, emitting a co-purchase
    /// update for the genuinely new items.
    pub fn add_purchase(
        &self,
        user: &str,
        items: &[ItemId],
        matrix: Option<&dyn RecommendMatrix>,
    ) -> bool {
        let mut entry = self.user_items.entry(user.to_string()).or_default();
        let mut new_items: Vec<ItemId> = Vec::new();
        for item in items {
            if !entry.contains(item) && !new_items.contains(item) {
                new_items.push(*item);
            }
        }
        if new_items.is_empty() {
            return true;
        }
        if let Some(matrix) = matrix {
            let old_items: Vec<ItemId> = entry.iter().copied().collect();
            matrix.update(&old_items, &new_items);
        }
        entry.extend(new_items);
        true
    }

    /// The items a user has purchased.
    pub fn user_items(&self, user: &str) -> BTreeSet<ItemId> {
        self.user_items
            .get(user)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let snapshot: BTreeMap<String, BTreeSet<ItemId>> = self
            .user_items
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Cart store
// ============================================================================

/// Last-known shopping cart per user.
pub struct CartStore {
    path: PathBuf,
    carts: DashMap<String, Vec<ItemId>>,
}

impl CartStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("carts.snap");
        let carts = DashMap::new();
        if let Some(snapshot) = load_snapshot::<BTreeMap<String, Vec<ItemId>>>(&path)? {
            for (k, v) in snapshot {
                carts.insert(k, v);
            }
        }
        Ok(CartStore { path, carts })
    }

    /// Replace a user's cart.
    pub fn update_cart(&self, user: &str, items: Vec<ItemId>) -> bool {
        self.carts.insert(user.to_string(), items);
        true
    }

    /// The user's current cart.
    pub fn get_cart(&self, user: &str) -> Vec<ItemId> {
        self.carts.get(user).map(|v| v.clone()).unwrap_or_default()
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let snapshot: BTreeMap<String, Vec<ItemId>> = self
            .carts
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Order store
// ============================================================================

/// Append-only order log with on-demand frequent item pair mining.
pub struct OrderStore {
    path: PathBuf,
    orders: Mutex<Vec<Vec<ItemId>>>,
    freq_pairs: Mutex<BTreeMap<(ItemId, ItemId), u64>>,
}

#[derive(Serialize, Deserialize, Default)]
struct OrderSnapshot {
    orders: Vec<Vec<ItemId>>,
    freq_pairs: Vec<((ItemId, ItemId), u64)>,
}

impl OrderStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("orders.snap");
        let snapshot = load_snapshot::<OrderSnapshot>(&path)?.unwrap_or_default();
        Ok(OrderStore {
            path,
            orders: Mutex::new(snapshot.orders),
            freq_pairs: Mutex::new(snapshot.freq_pairs.into_iter().collect()),
        })
    }

    /// Record one order's item list.
    pub fn add_order(&self, items: Vec<ItemId>) -> bool {
        if items.is_empty() {
            return false;
        }
        self.orders.lock().push(items);
        true
    }

    /// Number of recorded orders.
    pub fn order_count(&self) -> usize {
        self.orders.lock().len()
    }

    /// Recompute item pair frequencies across all recorded orders.
    pub fn build_freq_item_sets(&self) {
        let orders = self.orders.lock();
        let mut pairs: BTreeMap<(ItemId, ItemId), u64> = BTreeMap::new();
        for order in orders.iter() {
            let mut sorted: Vec<ItemId> = order.clone();
            sorted.sort_unstable();
            sorted.dedup();
            for (i, &a) in sorted.iter().enumerate() {
                for &b in &sorted[i + 1..] {
                    *pairs.entry((a, b)).or_default() += 1;
                }
            }
        }
        *self.freq_pairs.lock() = pairs;
    }

    /// Item pairs co-occurring in at least `min_support` orders.
    pub fn frequent_pairs(&self, min_support: u64) -> Vec<((ItemId, ItemId), u64)> {
        self.freq_pairs
            .lock()
            .iter()
            .filter(|(_, &count)| count >= min_support)
            .map(|(&pair, &count)| (pair, count))
            .collect()
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let snapshot = OrderSnapshot {
            orders: self.orders.lock().clone(),
            freq_pairs: self
                .freq_pairs
                .lock()
                .iter()
                .map(|(&pair, &count)| (pair, count))
                .collect(),
        };
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Event store
// ============================================================================

/// Item sets per (event, user) pair.
pub struct EventStore {
    path: PathBuf,
    events: DashMap<(String, String), BTreeSet<ItemId>>,
}

impl EventStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("events.snap");
        let events = DashMap::new();
        if let Some(snapshot) =
            load_snapshot::<Vec<((String, String), BTreeSet<ItemId>)>>(&path)?
        {
            for (k, v) in snapshot {
                events.insert(k, v);
            }
        }
        Ok(EventStore { path, events })
    }

    /// Attach an item to an (event, user) pair.
    pub fn add_event(&self, event: &str, user: &str, item: ItemId) -> bool {
        self.events
            .entry((event.to_string(), user.to_string()))
            .or_default()
            .insert(item);
        true
    }

    /// Detach an item from an (event, user) pair. `false` when absent.
    pub fn remove_event(&self, event: &str, user: &str, item: ItemId) -> bool {
        match self
            .events
            .get_mut(&(event.to_string(), user.to_string()))
        {
            Some(mut entry) => entry.remove(&item),
            None => false,
        }
    }

    /// The items attached to an (event, user) pair.
    pub fn items(&self, event: &str, user: &str) -> BTreeSet<ItemId> {
        self.events
            .get(&(event.to_string(), user.to_string()))
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let mut snapshot: Vec<((String, String), BTreeSet<ItemId>)> = self
            .events
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Rate store
// ============================================================================

/// Star ratings per (user, item).
pub struct RateStore {
    path: PathBuf,
    rates: DashMap<(String, ItemId), u8>,
}

impl RateStore {
    /// Open the store, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("rates.snap");
        let rates = DashMap::new();
        if let Some(snapshot) = load_snapshot::<Vec<((String, ItemId), u8)>>(&path)? {
            for (k, v) in snapshot {
                rates.insert(k, v);
            }
        }
        Ok(RateStore { path, rates })
    }

    /// Set a rating.
    pub fn add_rate(&self, user: &str, item: ItemId, rate: u8) -> bool {
        self.rates.insert((user.to_string(), item), rate);
        true
    }

    /// Remove a rating. `false` when absent.
    pub fn remove_rate(&self, user: &str, item: ItemId) -> bool {
        self.rates.remove(&(user.to_string(), item)).is_some()
    }

    /// Fetch a rating.
    pub fn get(&self, user: &str, item: ItemId) -> Option<u8> {
        self.rates.get(&(user.to_string(), item)).map(|r| *r)
    }

    /// Snapshot the store to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let mut snapshot: Vec<((String, ItemId), u8)> = self
            .rates
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        write_snapshot(&self.path, &snapshot)
    }
}

// ============================================================================
// Query → purchase counter
// ============================================================================

/// Click counts of purchased items under the query that led to them.
pub struct QueryPurchaseCounter {
    path: PathBuf,
    counts: DashMap<String, BTreeMap<ItemId, u64>>,
}

impl QueryPurchaseCounter {
    /// Open the counter, loading any previous snapshot from `dir`.
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let path = dir.join("query_purchase.snap");
        let counts = DashMap::new();
        if let Some(snapshot) =
            load_snapshot::<BTreeMap<String, BTreeMap<ItemId, u64>>>(&path)?
        {
            for (k, v) in snapshot {
                counts.insert(k, v);
            }
        }
        Ok(QueryPurchaseCounter { path, counts })
    }

    /// Count one purchase click of `item` under `query`.
    pub fn click(&self, query: &str, item: ItemId) -> bool {
        *self
            .counts
            .entry(query.to_string())
            .or_default()
            .entry(item)
            .or_default() += 1;
        true
    }

    /// The per-item click counts for a query.
    pub fn get(&self, query: &str) -> BTreeMap<ItemId, u64> {
        self.counts
            .get(query)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Snapshot the counter to disk.
    pub fn flush(&self) -> EngineResult<()> {
        let snapshot: BTreeMap<String, BTreeMap<ItemId, u64>> = self
            .counts
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        write_snapshot(&self.path, &snapshot)
    }
}
