//! A minimal type-keyed map used to attach arbitrary application state to
//! a [`Session`](crate::session::Session) or a Socket.IO namespace socket,
//! mirroring the "arbitrary user-attached dictionary" the spec's data
//! model calls for.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

/// A type-keyed bag of `Send + Sync` values, at most one per type.
#[derive(Default)]
pub struct Extensions {
    map: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one of the same type, if
    /// any.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.map
            .write()
            .unwrap()
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Clones out the value of type `T`, if present.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .read()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Removes the value of type `T`, if present.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .write()
            .unwrap()
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let ext = Extensions::new();
        assert_eq!(ext.insert(42i32), None);
        assert_eq!(ext.get::<i32>(), Some(42));
    }

    #[test]
    fn distinct_types_do_not_collide() {
        let ext = Extensions::new();
        ext.insert(7i32);
        ext.insert("hello".to_string());
        assert_eq!(ext.get::<i32>(), Some(7));
        assert_eq!(ext.get::<String>(), Some("hello".to_string()));
    }

    #[test]
    fn remove_clears_the_slot() {
        let ext = Extensions::new();
        ext.insert(1u8);
        assert_eq!(ext.remove::<u8>(), Some(1));
        assert_eq!(ext.get::<u8>(), None);
    }
}
