pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod hal;
pub mod logging;
pub mod service;
pub mod task;
pub mod validation;

pub use config::ServiceConfig;
pub use error::{DaqError, DaqResult, ErrorKind};
pub use service::DaqService;
