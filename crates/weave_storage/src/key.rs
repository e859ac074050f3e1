//! Keys, key ranges and key paths.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use weave_codec::Value;

/// A key in an ordered store or index.
///
/// Keys of different kinds order as `Number < Text < Bytes < Array`; arrays
/// compare element by element, then by length.
#[derive(Debug, Clone)]
pub enum Key {
    /// Numeric key. Never NaN; `-0.0` is normalized to `0.0`.
    Number(f64),
    /// Text key.
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
    /// Compound key.
    Array(Vec<Key>),
}

impl Key {
    /// Creates a numeric key. Returns `None` for NaN.
    #[must_use]
    pub fn number(n: f64) -> Option<Self> {
        if n.is_nan() {
            None
        } else if n == 0.0 {
            Some(Key::Number(0.0))
        } else {
            Some(Key::Number(n))
        }
    }

    /// Converts a value into a key, if it is a valid key.
    ///
    /// Null, booleans and maps are not keys. An array is a key only if all
    /// of its elements are.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Key::number(*n as f64),
            Value::Float(f) => Key::number(*f),
            Value::Text(s) => Some(Key::Text(s.clone())),
            Value::Bytes(b) => Some(Key::Bytes(b.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Value::Null | Value::Bool(_) | Value::Map(_) => None,
        }
    }

    /// Converts this key back into a value.
    ///
    /// Integral numbers become integers so that auto-generated keys read back
    /// as ids.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => match self.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(*n),
            },
            Key::Text(s) => Value::Text(s.clone()),
            Key::Bytes(b) => Value::Bytes(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Returns the key as an integer if it is an integral number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Key::Number(n) if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 => {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    /// Returns the elements of an array key.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Key]> {
        match self {
            Key::Array(items) => Some(items),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Text(_) => 1,
            Key::Bytes(_) => 2,
            Key::Array(_) => 3,
        }
    }
}

impl From<i64> for Key {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Bytes(a), Key::Bytes(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Key::Number(n) => n.to_bits().hash(state),
            Key::Text(s) => s.hash(state),
            Key::Bytes(b) => b.hash(state),
            Key::Array(items) => items.hash(state),
        }
    }
}

/// A contiguous range of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub lower: Bound<Key>,
    /// Upper bound.
    pub upper: Bound<Key>,
}

impl KeyRange {
    /// The unbounded range.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range containing exactly one key.
    #[must_use]
    pub fn only(key: Key) -> Self {
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// All keys above `key`.
    #[must_use]
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: if open { Bound::Excluded(key) } else { Bound::Included(key) },
            upper: Bound::Unbounded,
        }
    }

    /// All keys below `key`.
    #[must_use]
    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: if open { Bound::Excluded(key) } else { Bound::Included(key) },
        }
    }

    /// All keys between `lower` and `upper`.
    #[must_use]
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: if lower_open { Bound::Excluded(lower) } else { Bound::Included(lower) },
            upper: if upper_open { Bound::Excluded(upper) } else { Bound::Included(upper) },
        }
    }

    /// Returns true if `key` lies within this range.
    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Returns the bounds for a `BTreeMap::range` call, or `None` if the range
    /// cannot contain any key.
    pub(crate) fn bounds(&self) -> Option<(Bound<&Key>, Bound<&Key>)> {
        check_bounds(as_ref(&self.lower), as_ref(&self.upper))
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

pub(crate) fn as_ref(bound: &Bound<Key>) -> Bound<&Key> {
    match bound {
        Bound::Included(k) => Bound::Included(k),
        Bound::Excluded(k) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Validates a bound pair so that `BTreeMap::range` cannot panic.
pub(crate) fn check_bounds<'a>(
    lower: Bound<&'a Key>,
    upper: Bound<&'a Key>,
) -> Option<(Bound<&'a Key>, Bound<&'a Key>)> {
    let (l, u) = match (&lower, &upper) {
        (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) => (*l, *u),
        _ => return Some((lower, upper)),
    };
    match l.cmp(u) {
        Ordering::Greater => None,
        Ordering::Equal if !matches!((&lower, &upper), (Bound::Included(_), Bound::Included(_))) => {
            None
        }
        _ => Some((lower, upper)),
    }
}

/// Where index (or in-line primary) keys are read from in a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPath {
    /// A single property.
    Single(String),
    /// An ordered tuple of properties producing an array key.
    Compound(Vec<String>),
}

impl KeyPath {
    /// Evaluates the key path against a stored value.
    #[must_use]
    pub fn evaluate(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(name) => value.get(name).and_then(Key::from_value),
            KeyPath::Compound(names) => names
                .iter()
                .map(|n| value.get(n).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Returns the property names of this key path.
    #[must_use]
    pub fn properties(&self) -> Vec<&str> {
        match self {
            KeyPath::Single(name) => vec![name.as_str()],
            KeyPath::Compound(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_order_numbers_first() {
        let mut keys = vec![
            Key::Array(vec![Key::from(1)]),
            Key::from("a"),
            Key::Bytes(vec![0]),
            Key::from(99),
        ];
        keys.sort();
        assert_eq!(keys[0], Key::from(99));
        assert_eq!(keys[1], Key::from("a"));
        assert!(matches!(keys[2], Key::Bytes(_)));
        assert!(matches!(keys[3], Key::Array(_)));
    }

    #[test]
    fn negative_zero_equals_zero() {
        assert_eq!(Key::number(-0.0).unwrap(), Key::from(0));
        assert!(Key::number(f64::NAN).is_none());
    }

    #[test]
    fn value_conversion_rules() {
        assert_eq!(Key::from_value(&Value::Integer(3)), Some(Key::from(3)));
        assert_eq!(Key::from_value(&Value::Null), None);
        assert_eq!(Key::from_value(&Value::Bool(true)), None);
        assert_eq!(
            Key::from_value(&Value::Array(vec![Value::Integer(1), Value::Null])),
            None
        );
        assert_eq!(Key::from(7).to_value(), Value::Integer(7));
        assert_eq!(Key::Number(1.5).to_value(), Value::Float(1.5));
    }

    #[test]
    fn range_inclusion() {
        let range = KeyRange::bound(Key::from(10), Key::from(20), false, true);
        assert!(range.includes(&Key::from(10)));
        assert!(range.includes(&Key::from(15)));
        assert!(!range.includes(&Key::from(20)));
        assert!(!range.includes(&Key::from("15")));
        assert!(KeyRange::all().includes(&Key::from("x")));
    }

    #[test]
    fn inverted_range_has_no_bounds() {
        let range = KeyRange::bound(Key::from(5), Key::from(1), false, false);
        assert!(range.bounds().is_none());
        let open = KeyRange::bound(Key::from(5), Key::from(5), true, false);
        assert!(open.bounds().is_none());
        assert!(KeyRange::only(Key::from(5)).bounds().is_some());
    }

    #[test]
    fn compound_key_path() {
        let value = Value::object([("a", Value::from(1)), ("b", Value::from("x"))]);
        let path = KeyPath::Compound(vec!["a".into(), "b".into()]);
        assert_eq!(
            path.evaluate(&value),
            Some(Key::Array(vec![Key::from(1), Key::from("x")]))
        );
        assert_eq!(KeyPath::Single("missing".into()).evaluate(&value), None);
    }
}
