//! Request-level middleware: per-request timeout and load shedding.

pub mod load_shed;
pub mod timeout;

pub use load_shed::{LoadShedError, LoadShedLayer, LoadShedService};
pub use timeout::{TimeoutLayer, TimeoutService};
