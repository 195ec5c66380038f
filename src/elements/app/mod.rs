//! Elements that hand data to application code.

mod appsink;

pub use appsink::{AppSink, AppSinkHandle, AppSinkStats};
