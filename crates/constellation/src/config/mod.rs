//! Service file parsing

mod service_file;

pub use service_file::*;
