//! Interned identifiers backed by a global symbol pool.
use std::sync::{Mutex, OnceLock};
use string_interner::{
    backend::BucketBackend, symbol::SymbolU32, StringInterner,
};

type Pool = StringInterner<BucketBackend>;

fn pool() -> &'static Mutex<Pool> {
    static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(Pool::new()))
}

/// A globally interned symbol.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GSym(SymbolU32);

impl GSym {
    /// Intern a string into the global symbol table.
    pub fn new(s: impl AsRef<str>) -> Self {
        GSym(pool().lock().unwrap().get_or_intern(s.as_ref()))
    }

    /// Resolve this symbol back into an owned string.
    pub fn resolve(&self) -> String {
        pool()
            .lock()
            .unwrap()
            .resolve(self.0)
            .expect("symbol interned by this pool")
            .to_string()
    }
}

impl From<&str> for GSym {
    fn from(s: &str) -> Self {
        GSym::new(s)
    }
}

impl From<String> for GSym {
    fn from(s: String) -> Self {
        GSym::new(&s)
    }
}

impl std::fmt::Debug for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.resolve(), f)
    }
}

impl std::fmt::Display for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.resolve())
    }
}

/// A name in the graph: component, port, and bus names are all `Id`s.
/// Copyable, cheap to compare, and stable for one process lifetime.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(GSym);

impl Id {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Id(GSym::new(name))
    }

    pub fn to_string(self) -> String {
        self.0.resolve()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::new(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::new(&s)
    }
}

impl PartialEq<&str> for Id {
    fn eq(&self, other: &&str) -> bool {
        self.0.resolve() == *other
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::Id;

    #[test]
    fn interning_is_stable() {
        let a = Id::new("go");
        let b = Id::from("go");
        assert_eq!(a, b);
        assert_eq!(a, "go");
        assert_eq!(a.to_string(), "go");
    }
}
