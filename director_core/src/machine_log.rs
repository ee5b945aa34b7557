//! The machine a thread is working for, used to prefix log lines.
//!
//! Tasks spawned through [`crate::par::group`] inherit the ID of the thread
//! that spawned them.

use std::cell::RefCell;

thread_local! {
    static MACHINE_ID: RefCell<String> = RefCell::new(String::from("local"));
}

#[inline]
pub fn set_machine_id<S: Into<String>>(id: S) {
    MACHINE_ID.with(|r| *r.borrow_mut() = id.into());
}

#[inline]
pub fn machine_id() -> String {
    MACHINE_ID.with(|r| r.borrow().clone())
}
