//! Collection schemas and the physical layout derived from them.
//!
//! A schema is static metadata: it names a collection, its properties, its
//! indexes and its outgoing links. Everything the storage layout needs
//! (index key paths, multi-entry flags, link store names) is derived from it
//! here and nowhere else.

mod verify;

pub use verify::verify_schemas;

use serde::{Deserialize, Serialize};
use weave_storage::{IndexInfo, KeyPath};

/// Name of the reverse-lookup index every link store carries.
pub const BACKLINK_INDEX: &str = "backlink";

/// Property of a link store entry holding the source id.
pub const LINK_SOURCE_FIELD: &str = "a";

/// Property of a link store entry holding the target id.
pub const LINK_TARGET_FIELD: &str = "b";

/// Returns the name of the store holding the pairs of one link.
#[must_use]
pub fn link_store_name(source: &str, target: &str, link: &str) -> String {
    format!("_{source}_{target}_{link}")
}

/// Semantic type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Boolean, stored as `1` / `0`.
    Bool,
    /// Unsigned byte.
    Byte,
    /// 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// Timestamp in microseconds.
    DateTime,
    /// UTF-8 string.
    String,
    /// Embedded object.
    Object,
    /// List of booleans.
    BoolList,
    /// List of bytes.
    ByteList,
    /// List of 32-bit integers.
    IntList,
    /// List of 32-bit floats.
    FloatList,
    /// List of 64-bit integers.
    LongList,
    /// List of 64-bit floats.
    DoubleList,
    /// List of timestamps.
    DateTimeList,
    /// List of strings.
    StringList,
    /// List of embedded objects.
    ObjectList,
}

impl PropertyType {
    /// Returns true for list types.
    #[must_use]
    pub const fn is_list(self) -> bool {
        matches!(
            self,
            Self::BoolList
                | Self::ByteList
                | Self::IntList
                | Self::FloatList
                | Self::LongList
                | Self::DoubleList
                | Self::DateTimeList
                | Self::StringList
                | Self::ObjectList
        )
    }

    /// Returns true for `Bool` and `BoolList`.
    #[must_use]
    pub const fn is_bool(self) -> bool {
        matches!(self, Self::Bool | Self::BoolList)
    }

    /// Returns true for `Object` and `ObjectList`.
    #[must_use]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object | Self::ObjectList)
    }

    /// Returns true for `String` and `StringList`.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::String | Self::StringList)
    }
}

/// How a property contributes to an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexType {
    /// The value itself. On a list property this makes the index multi-entry.
    #[default]
    Value,
    /// A hash of the whole value.
    Hash,
    /// A hash of each list element.
    HashElements,
}

/// A named, typed property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Property name.
    pub name: String,
    /// Property type.
    #[serde(rename = "type")]
    pub ty: PropertyType,
}

/// One property of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPropertySchema {
    /// Property name.
    pub name: String,
    /// How the property is indexed.
    #[serde(rename = "type", default)]
    pub index_type: IndexType,
    /// Whether string comparison is case-sensitive.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

fn default_true() -> bool {
    true
}

impl IndexPropertySchema {
    /// Creates a case-sensitive index property.
    pub fn new(name: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            name: name.into(),
            index_type,
            case_sensitive: true,
        }
    }

    /// Sets case sensitivity.
    #[must_use]
    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = value;
        self
    }
}

/// A secondary index over one or more properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Reject two records with equal keys.
    #[serde(default)]
    pub unique: bool,
    /// Indexed properties, in key order.
    pub properties: Vec<IndexPropertySchema>,
}

impl IndexSchema {
    /// Creates a non-unique index without properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: false,
            properties: Vec::new(),
        }
    }

    /// Sets the unique flag.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Appends a case-sensitive property.
    #[must_use]
    pub fn property(self, name: impl Into<String>, index_type: IndexType) -> Self {
        self.with_property(IndexPropertySchema::new(name, index_type))
    }

    /// Appends a fully specified property.
    #[must_use]
    pub fn with_property(mut self, property: IndexPropertySchema) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the property names in key order.
    #[must_use]
    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name.as_str()).collect()
    }

    /// An index is multi-entry iff one of its properties is a list indexed
    /// by value.
    #[must_use]
    pub fn is_multi_entry(&self, schema: &CollectionSchema) -> bool {
        self.properties.iter().any(|ip| {
            ip.index_type == IndexType::Value
                && schema
                    .property_named(&ip.name)
                    .is_some_and(|p| p.ty.is_list())
        })
    }

    /// Single property for one-property indexes, an ordered tuple otherwise.
    #[must_use]
    pub fn key_path(&self) -> KeyPath {
        match self.properties.as_slice() {
            [single] => KeyPath::Single(single.name.clone()),
            many => KeyPath::Compound(many.iter().map(|p| p.name.clone()).collect()),
        }
    }

    /// Describes the physical index this schema requires.
    #[must_use]
    pub fn to_index_info(&self, schema: &CollectionSchema) -> IndexInfo {
        IndexInfo::new(self.name.clone(), self.key_path())
            .unique(self.unique)
            .multi_entry(self.is_multi_entry(schema))
    }
}

/// A named directed relation to another collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSchema {
    /// Link name.
    pub name: String,
    /// Target collection.
    pub target: String,
}

/// Static description of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Name under which the identity key is exposed to callers.
    #[serde(default = "default_id_name")]
    pub id_name: String,
    /// Properties.
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
    /// Outgoing links.
    #[serde(default)]
    pub links: Vec<LinkSchema>,
}

fn default_id_name() -> String {
    "id".to_string()
}

impl CollectionSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_name: default_id_name(),
            properties: Vec::new(),
            indexes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Sets the identity key name.
    #[must_use]
    pub fn id_name(mut self, name: impl Into<String>) -> Self {
        self.id_name = name.into();
        self
    }

    /// Appends a property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.properties.push(PropertySchema {
            name: name.into(),
            ty,
        });
        self
    }

    /// Appends an index.
    #[must_use]
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Appends a link.
    #[must_use]
    pub fn link(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.links.push(LinkSchema {
            name: name.into(),
            target: target.into(),
        });
        self
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property_named(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index_named(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Names of `Bool` and `BoolList` properties, used when decoding.
    #[must_use]
    pub fn bool_properties(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| p.ty.is_bool())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Store names of this collection's outgoing links.
    #[must_use]
    pub fn link_store_names(&self) -> Vec<String> {
        self.links
            .iter()
            .map(|l| link_store_name(&self.name, &l.target, &l.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CollectionSchema {
        CollectionSchema::new("posts")
            .property("title", PropertyType::String)
            .property("tags", PropertyType::StringList)
            .property("score", PropertyType::Long)
            .index(IndexSchema::new("title").property("title", IndexType::Value))
            .index(IndexSchema::new("tags").property("tags", IndexType::Value))
            .index(IndexSchema::new("tags_hash").property("tags", IndexType::Hash))
            .index(
                IndexSchema::new("title_score")
                    .unique(true)
                    .property("title", IndexType::Value)
                    .property("score", IndexType::Value),
            )
    }

    #[test]
    fn multi_entry_only_for_value_indexed_lists() {
        let schema = schema();
        assert!(!schema.index_named("title").unwrap().is_multi_entry(&schema));
        assert!(schema.index_named("tags").unwrap().is_multi_entry(&schema));
        assert!(!schema.index_named("tags_hash").unwrap().is_multi_entry(&schema));
    }

    #[test]
    fn key_paths() {
        let schema = schema();
        assert_eq!(
            schema.index_named("title").unwrap().key_path(),
            KeyPath::Single("title".into())
        );
        assert_eq!(
            schema.index_named("title_score").unwrap().key_path(),
            KeyPath::Compound(vec!["title".into(), "score".into()])
        );
    }

    #[test]
    fn index_info_carries_all_attributes() {
        let schema = schema();
        let index = schema.index_named("title_score").unwrap();
        let info = index.to_index_info(&schema);
        assert_eq!(info.name, "title_score");
        assert_eq!(
            info.key_path,
            KeyPath::Compound(vec!["title".into(), "score".into()])
        );
        assert_eq!(info, index.to_index_info(&schema));
        assert_ne!(info, info.clone().unique(!info.unique));
        assert_ne!(info, info.clone().multi_entry(!info.multi_entry));
    }

    #[test]
    fn link_store_naming() {
        assert_eq!(link_store_name("users", "posts", "authored"), "_users_posts_authored");
        let schema = CollectionSchema::new("a").link("to_b", "b");
        assert_eq!(schema.link_store_names(), vec!["_a_b_to_b".to_string()]);
    }

    #[test]
    fn bool_properties_include_lists() {
        let schema = CollectionSchema::new("flags")
            .property("on", PropertyType::Bool)
            .property("bits", PropertyType::BoolList)
            .property("n", PropertyType::Int);
        assert_eq!(schema.bool_properties(), vec!["on".to_string(), "bits".to_string()]);
    }
}
