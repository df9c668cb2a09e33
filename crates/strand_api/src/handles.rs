//! Loop-local handle table.
//!
//! Background tasks cannot carry engine values across threads, so host
//! operations park their engine-side state (deferreds, controller handles,
//! callbacks) here and ship only the numeric key. The completion closure
//! looks the state back up once it runs on the loop thread. Entries die with
//! the thread, so a handle can never outlive its runtime.

use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

pub type HandleId = u64;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TABLE: RefCell<HashMap<HandleId, Box<dyn Any>>> =
        RefCell::new(HashMap::new());
}

pub fn insert<T: Any>(value: T) -> HandleId {
    let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    TABLE.with(|table| table.borrow_mut().insert(id, Box::new(value)));
    id
}

/// Runs `f` over the entry, leaving it in the table.
pub fn with<T: Any, R>(id: HandleId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    TABLE.with(|table| {
        let mut table = table.borrow_mut();
        let entry = table.get_mut(&id)?.downcast_mut::<T>()?;
        Some(f(entry))
    })
}

/// Removes and returns the entry.
pub fn take<T: Any>(id: HandleId) -> Option<T> {
    TABLE.with(|table| {
        let entry = table.borrow_mut().remove(&id)?;
        entry.downcast::<T>().ok().map(|boxed| *boxed)
    })
}

pub fn remove(id: HandleId) {
    TABLE.with(|table| {
        table.borrow_mut().remove(&id);
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_with_take_roundtrip() {
        let id = insert(41u32);
        assert_eq!(with::<u32, _>(id, |value| *value + 1), Some(42));
        assert_eq!(take::<u32>(id), Some(41));
        assert_eq!(take::<u32>(id), None);
    }

    #[test]
    fn downcast_mismatch_is_none() {
        let id = insert("text");
        assert_eq!(with::<u32, _>(id, |value| *value), None);
        remove(id);
    }
}
