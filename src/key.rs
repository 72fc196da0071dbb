use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::Hash;
use std::hash::Hasher;

/// Memcache refuses keys longer than this.
pub const MAX_CACHE_KEY_LEN: usize = 250;

/// Incomplete ids order first, then integer ids, then names.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyId {
    Incomplete,
    Int(i64),
    Name(String),
}

/// Identity of an entity in the backing store.
///
/// A key is a path of `(kind, id)` elements rooted in a namespace. Keys order element by element from the root, each
/// element by namespace, kind and id. The [encoded](Key::encode) form is stable across processes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Key {
    namespace: String,
    parent:    Option<Box<Key>>,
    kind:      String,
    id:        KeyId,
}

impl Key {
    pub fn int<S: Into<String>>(kind: S, id: i64) -> Self {
        Self {
            namespace: String::new(),
            parent:    None,
            kind:      kind.into(),
            id:        if id == 0 { KeyId::Incomplete } else { KeyId::Int(id) },
        }
    }

    pub fn name<S: Into<String>, N: Into<String>>(kind: S, name: N) -> Self {
        let name = name.into();
        Self {
            namespace: String::new(),
            parent:    None,
            kind:      kind.into(),
            id:        if name.is_empty() { KeyId::Incomplete } else { KeyId::Name(name) },
        }
    }

    /// A key the backing store will assign an id to on write.
    pub fn incomplete<S: Into<String>>(kind: S) -> Self {
        Self {
            namespace: String::new(),
            parent:    None,
            kind:      kind.into(),
            id:        KeyId::Incomplete,
        }
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        // Children always live in their parent's namespace.
        self.namespace = parent.namespace.clone();
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self.id, KeyId::Incomplete)
    }

    /// Returns a copy of this key with the id filled in. Used by stores allocating ids for incomplete keys.
    pub fn complete_with(&self, id: i64) -> Self {
        let mut key = self.clone();
        key.id = KeyId::Int(id);
        key
    }

    /// Checks the key is usable as an entity address. Incompleteness of the key itself is not an error here because
    /// writes accept incomplete keys.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.is_empty() {
            return Err("key kind must not be empty".to_string());
        }
        if let Some(parent) = self.parent() {
            if !parent.is_complete() {
                return Err(format!("parent of '{self}' is incomplete"));
            }
            if parent.namespace != self.namespace {
                return Err(format!(
                    "'{self}' is in namespace '{}' but its parent is in '{}'",
                    self.namespace, parent.namespace
                ));
            }
            parent.validate()?;
        }
        Ok(())
    }

    /// Stable string form of the key, distinct for distinct keys. Integer ids encode in numeric order.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(32);
        escape_into(&self.namespace, &mut out);
        self.encode_path(&mut out);
        out
    }

    fn encode_path(&self, out: &mut String) {
        if let Some(parent) = self.parent() {
            parent.encode_path(out);
        }
        out.push('/');
        escape_into(&self.kind, out);
        out.push(':');
        match &self.id {
            KeyId::Incomplete => out.push('?'),
            // Flipping the sign bit makes unsigned lexical order match signed numeric order.
            KeyId::Int(id) => out.push_str(&format!("i{:016x}", (*id as u64) ^ (1 << 63))),
            KeyId::Name(name) => {
                out.push('s');
                escape_into(name, out);
            }
        }
    }

    /// Elements from the root down to this key.
    fn path(&self) -> Vec<&Key> {
        let mut path = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent() {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// The index under which the key's item lives in the distributed cache.
    pub fn cache_key(&self, prefix: &str) -> String {
        let encoded = self.encode();
        if prefix.len() + encoded.len() <= MAX_CACHE_KEY_LEN {
            format!("{prefix}{encoded}")
        }
        else {
            format!("{prefix}sha256:{}", hex::encode(Sha256::digest(encoded.as_bytes())))
        }
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.kind == other.kind
            && self.id == other.id
            && self.parent == other.parent
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.parent.hash(state);
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Agrees with `PartialEq`: keys are equal only if every element of their paths is.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        let (ours, theirs) = (self.path(), other.path());
        ours.iter()
            .zip(&theirs)
            .map(|(a, b)| (&a.namespace, &a.kind, &a.id).cmp(&(&b.namespace, &b.kind, &b.id)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| ours.len().cmp(&theirs.len()))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}")?;
        }
        else if !self.namespace.is_empty() {
            write!(f, "[{}]", self.namespace)?;
        }
        match &self.id {
            KeyId::Incomplete => write!(f, "/{},?", self.kind),
            KeyId::Int(id) => write!(f, "/{},{id}", self.kind),
            KeyId::Name(name) => write!(f, "/{},{name:?}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_id_is_incomplete() {
        assert!(!Key::int("Entity", 0).is_complete());
        assert!(!Key::name("Entity", "").is_complete());
        assert!(Key::int("Entity", -3).is_complete());
    }

    #[test]
    fn encoding_preserves_integer_order() {
        let ids = [i64::MIN, -100, -1, 1, 2, 10, 255, 256, i64::MAX];
        let keys = ids.iter().map(|id| Key::int("Entity", *id)).collect::<Vec<_>>();
        for pair in keys.windows(2) {
            assert!(pair[0].encode() < pair[1].encode(), "{} !< {}", pair[0], pair[1]);
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn separators_are_escaped() {
        let a = Key::name("A", "x/B:sy");
        let b = Key::name("B", "y").with_parent(Key::name("A", "x"));
        assert_ne!(a.encode(), b.encode());
        assert_ne!(a, b);
    }

    #[test]
    fn parent_and_namespace_matter() {
        let parent = Key::int("Parent", 1).with_namespace("ns");
        let child = Key::int("Entity", 1).with_parent(parent.clone());
        assert_eq!(child.namespace(), "ns");
        assert_ne!(child.encode(), Key::int("Entity", 1).encode());
        assert_eq!(child.parent(), Some(&parent));
        assert_eq!(child.to_string(), "[ns]/Parent,1/Entity,1");
    }

    #[test]
    fn validation() {
        assert!(Key::int("", 1).validate().is_err());
        assert!(Key::int("Entity", 1).with_parent(Key::incomplete("Parent")).validate().is_err());
        assert!(Key::incomplete("Entity").validate().is_ok());

        let moved = Key::int("Entity", 1)
            .with_parent(Key::int("Parent", 1).with_namespace("a"))
            .with_namespace("b");
        assert!(moved.validate().is_err());
    }

    #[test]
    fn names_order_by_their_text() {
        let amp = Key::name("Entity", "a&");
        let slash = Key::name("Entity", "a/");
        let colon = Key::name("Entity", "a:");
        assert!(amp < slash);
        assert!(slash < colon);
        assert!(Key::incomplete("Entity") < Key::int("Entity", i64::MIN));
        assert!(Key::int("Entity", i64::MAX) < Key::name("Entity", "a"));
        assert!(Key::int("Parent", 1) < Key::int("Entity", 1).with_parent(Key::int("Parent", 1)));
    }

    #[test]
    fn ordering_agrees_with_equality() {
        let a = Key::int("Entity", 1)
            .with_parent(Key::int("Parent", 1).with_namespace("x"))
            .with_namespace("y");
        let b = Key::int("Entity", 1)
            .with_parent(Key::int("Parent", 1).with_namespace("y"))
            .with_namespace("y");
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);

        let set = [a.clone(), b.clone(), a.clone()]
            .into_iter()
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(set.len(), 2);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn long_keys_are_hashed() {
        let short = Key::int("Entity", 1);
        assert_eq!(short.cache_key("p:"), format!("p:{}", short.encode()));

        let long = Key::name("Entity", "n".repeat(400));
        let cache_key = long.cache_key("p:");
        assert!(cache_key.len() <= MAX_CACHE_KEY_LEN);
        assert!(cache_key.starts_with("p:sha256:"));
        assert_eq!(cache_key, long.clone().cache_key("p:"));
    }
}
