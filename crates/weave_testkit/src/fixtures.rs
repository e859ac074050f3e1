//! Test fixtures and instance helpers.
//!
//! Every [`TestInstance`] lives in its own [`KvEnv`] and [`BroadcastHub`],
//! so tests never see each other's data or broadcasts.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use weave_core::{
    BroadcastHub, CollectionSchema, Config, IndexSchema, IndexType, Instance, KvEnv,
    PropertyType,
};

/// `users`: name, age, active flag and tags, with a self link `friends`.
///
/// Indexes: `name`, `age`, and the multi-entry `tags`.
pub fn users_schema() -> CollectionSchema {
    CollectionSchema::new("users")
        .property("name", PropertyType::String)
        .property("age", PropertyType::Int)
        .property("active", PropertyType::Bool)
        .property("tags", PropertyType::StringList)
        .index(IndexSchema::new("name").property("name", IndexType::Value))
        .index(IndexSchema::new("age").property("age", IndexType::Value))
        .index(IndexSchema::new("tags").property("tags", IndexType::Value))
        .link("friends", "users")
}

/// `posts`: title and score, with a link `author` to `users`.
///
/// Indexes: the unique `title` and `score`.
pub fn posts_schema() -> CollectionSchema {
    CollectionSchema::new("posts")
        .property("title", PropertyType::String)
        .property("score", PropertyType::Long)
        .index(IndexSchema::new("title").unique(true).property("title", IndexType::Value))
        .index(IndexSchema::new("score").property("score", IndexType::Value))
        .link("author", "users")
}

/// Both canned schemas.
pub fn sample_schemas() -> Vec<CollectionSchema> {
    vec![users_schema(), posts_schema()]
}

/// Installs a `fmt` subscriber honoring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An isolated instance with a unique database name.
pub struct TestInstance {
    /// The instance.
    pub db: Instance,
    /// Environment holding the database.
    pub env: Arc<KvEnv>,
    /// Hub the instance broadcasts on.
    pub hub: Arc<BroadcastHub>,
    schemas: Vec<CollectionSchema>,
}

impl TestInstance {
    /// Opens the canned schemas.
    pub fn new() -> Self {
        Self::with_schemas(sample_schemas())
    }

    /// Opens the given schemas.
    pub fn with_schemas(schemas: Vec<CollectionSchema>) -> Self {
        init_tracing();
        let env = KvEnv::new();
        let hub = BroadcastHub::new();
        let name = format!("test-{}", Uuid::new_v4());
        let db = Instance::open_in(
            Arc::clone(&env),
            Arc::clone(&hub),
            &name,
            schemas.clone(),
            Config::default(),
        )
        .expect("Failed to open test instance");
        Self {
            db,
            env,
            hub,
            schemas,
        }
    }

    /// Opens a second instance of the same database, sharing the
    /// environment and the broadcast hub.
    pub fn sibling(&self) -> Instance {
        self.open_sibling(self.schemas.clone())
            .expect("Failed to open sibling instance")
    }

    /// Opens a second instance of the same database with other schemas.
    pub fn open_sibling(&self, schemas: Vec<CollectionSchema>) -> weave_core::CoreResult<Instance> {
        Instance::open_in(
            Arc::clone(&self.env),
            Arc::clone(&self.hub),
            self.db.name(),
            schemas,
            Config::default(),
        )
    }
}

impl Default for TestInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestInstance {
    type Target = Instance;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a fresh instance of the canned schemas.
///
/// # Example
///
/// ```rust,ignore
/// use weave_testkit::with_test_instance;
///
/// #[test]
/// fn my_test() {
///     with_test_instance(|db| {
///         let users = db.collection("users").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_test_instance<F, R>(f: F) -> R
where
    F: FnOnce(&Instance) -> R,
{
    let test = TestInstance::new();
    f(&test.db)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use weave_core::{Id, Record};

    /// Creates an instance holding `count` users named `user0`, `user1`, …
    /// aged 20 + index, and returns their ids.
    pub fn populated_users(count: usize) -> (TestInstance, Vec<Id>) {
        let test = TestInstance::new();
        let users = test.collection("users").expect("users collection");
        let records = (0..count)
            .map(|i| {
                Record::new()
                    .set("name", format!("user{i}"))
                    .set("age", 20 + i as i64)
                    .set("active", i % 2 == 0)
            })
            .collect();
        let ids = test
            .write_txn(|txn| users.put_all(txn, records))
            .expect("Failed to put users");
        (test, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_isolated() {
        let a = TestInstance::new();
        let b = TestInstance::new();
        assert_ne!(a.name(), b.name());
        assert!(b.env.database_names().len() == 1);
    }

    #[test]
    fn test_populated_scenario() {
        let (test, ids) = scenarios::populated_users(5);
        assert_eq!(ids.len(), 5);
        let users = test.collection("users").unwrap();
        let count = test
            .read_txn(|txn| users.query().build()?.count(txn))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn sibling_shares_data() {
        let (test, ids) = scenarios::populated_users(1);
        let other = test.sibling();
        let users = other.collection("users").unwrap();
        let found = other.read_txn(|txn| users.get(txn, ids[0])).unwrap();
        assert!(found.is_some());
    }
}
