pub use director_core::machine_log::{machine_id, set_machine_id};

#[macro_export]
macro_rules! machine_trace {
    ($t: tt, $($arg:tt)*) => (
        log::trace!(std::concat!("{}: ", $t), $crate::machine_log::machine_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! machine_info {
    ($t: tt, $($arg:tt)*) => (
        log::info!(std::concat!("{}: ", $t), $crate::machine_log::machine_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! machine_warn {
    ($t: tt, $($arg:tt)*) => (
        log::warn!(std::concat!("{}: ", $t), $crate::machine_log::machine_id(), $($arg)*)
    )
}
