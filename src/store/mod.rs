//! Operator-editable state shared between the request path and the scheduler.
//!
//! Each store guards its value with a lock that is never held across I/O and
//! hands out owned snapshots, so a decision pass never sees a half-applied
//! update.

pub mod automatic;
pub mod mode;
pub mod persist;
pub mod schedule;

pub use automatic::AutomaticConfigStore;
pub use mode::ModeStore;
pub use persist::JsonFile;
pub use schedule::ScheduleStore;
