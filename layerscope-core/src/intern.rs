//! Interned identifiers for namespace tokens and attribute ids.
//!
//! Every dissector worker interns its attribute identifiers once when it is
//! created, so per-frame dissection only clones pointers. The pool is owned
//! by a [`Session`](crate::session::Session) and cleared when it closes.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;

/// An interned string.
///
/// Equality checks pointer identity first and falls back to the text, so
/// symbols from different pools (or built with [`Symbol::new`]) still compare
/// by value.
#[derive(Clone)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Create a symbol outside any pool.
    pub fn new(text: &str) -> Self {
        Symbol(Arc::from(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for Symbol {}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attribute identifier paired with its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub id: Symbol,
    pub name: &'static str,
}

/// Append-only string pool, safe for concurrent lookup and insert.
#[derive(Debug, Default)]
pub struct Interner {
    pool: RwLock<HashSet<Arc<str>>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled symbol for `text`, inserting it on first use.
    pub fn intern(&self, text: &str) -> Symbol {
        if let Some(existing) = self.pool.read().get(text) {
            return Symbol(existing.clone());
        }

        let mut pool = self.pool.write();
        // Another thread may have inserted between the two locks.
        if let Some(existing) = pool.get(text) {
            return Symbol(existing.clone());
        }
        let entry: Arc<str> = Arc::from(text);
        pool.insert(entry.clone());
        Symbol(entry)
    }

    /// Intern an attribute id together with its display name.
    pub fn field(&self, id: &str, name: &'static str) -> FieldDef {
        FieldDef {
            id: self.intern(id),
            name,
        }
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.read().is_empty()
    }

    /// Drop every pooled string. Outstanding symbols stay valid.
    pub fn clear(&self) {
        self.pool.write().clear();
    }
}
