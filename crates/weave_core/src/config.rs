//! Instance configuration.

use weave_storage::Durability;

/// Configuration for opening an instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Let write transactions commit before their data is durable.
    pub relaxed_durability: bool,

    /// Publish commits to, and accept changes from, other instances of the
    /// same database.
    pub broadcast: bool,

    /// Validate collection schemas before touching storage.
    pub verify_schema: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relaxed_durability: false,
            broadcast: true,
            verify_schema: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether write transactions use relaxed durability.
    #[must_use]
    pub const fn relaxed_durability(mut self, value: bool) -> Self {
        self.relaxed_durability = value;
        self
    }

    /// Sets whether commits are broadcast to other instances.
    #[must_use]
    pub const fn broadcast(mut self, value: bool) -> Self {
        self.broadcast = value;
        self
    }

    /// Sets whether schemas are validated at open.
    #[must_use]
    pub const fn verify_schema(mut self, value: bool) -> Self {
        self.verify_schema = value;
        self
    }

    /// Returns the durability hint for write transactions.
    #[must_use]
    pub const fn durability(&self) -> Durability {
        if self.relaxed_durability {
            Durability::Relaxed
        } else {
            Durability::Default
        }
    }
}
