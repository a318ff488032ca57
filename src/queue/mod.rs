pub mod log;
pub mod operation;
pub mod policy;

pub use log::OperationLog;
pub use operation::ContactOperation;
pub use policy::{next, should_skip, Prepared};
