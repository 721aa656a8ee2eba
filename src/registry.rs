//! Process-wide name registry for pools and ownership proxies (spec §4.6,
//! §9: "model as a process-wide map from name to actor reference").
//!
//! The registry is the one piece of state this crate shares outside of a
//! single [`Pool`](crate::pool::Pool)/[`OwnershipProxy`](crate::ownership::OwnershipProxy)
//! instance: writes happen once, at construction and at drop, and are
//! serialized through a plain mutex since nothing here ever awaits while
//! holding it (spec §5: "writes are serialized through the proxy actor;
//! reads are concurrent").

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn registry() -> &'static Mutex<HashMap<String, Box<dyn Any + Send + Sync>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `handle` under `name`, replacing any prior registration (a
/// named pool/proxy that is dropped and recreated under the same name is
/// expected to simply take over the slot).
pub(crate) fn register<T: Clone + Send + Sync + 'static>(name: &str, handle: T) {
    registry()
        .lock()
        .unwrap()
        .insert(name.to_string(), Box::new(handle));
}

/// Looks up a previously registered handle of type `T` by name.
pub(crate) fn lookup<T: Clone + Send + Sync + 'static>(name: &str) -> Option<T> {
    registry()
        .lock()
        .unwrap()
        .get(name)
        .and_then(|boxed| boxed.downcast_ref::<T>())
        .cloned()
}

/// Removes `name`'s registration, if it still points at `expected` (avoids
/// a late-dropping old instance clobbering a newer registration under the
/// same name).
pub(crate) fn unregister_if<T: PartialEq + Send + Sync + 'static>(name: &str, expected: &T) {
    let mut guard = registry().lock().unwrap();
    let matches = guard
        .get(name)
        .and_then(|boxed| boxed.downcast_ref::<T>())
        .map(|current| current == expected)
        .unwrap_or(false);
    if matches {
        guard.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_roundtrip() {
        register("widgets", 42i32);
        assert_eq!(lookup::<i32>("widgets"), Some(42));
        assert_eq!(lookup::<i32>("missing"), None);
    }

    #[test]
    fn unregister_if_only_removes_matching_value() {
        register("gizmos", 7i32);
        unregister_if("gizmos", &8i32);
        assert_eq!(lookup::<i32>("gizmos"), Some(7));
        unregister_if("gizmos", &7i32);
        assert_eq!(lookup::<i32>("gizmos"), None);
    }
}
