//! BrowserConfig handling: template merge, the resolved-spec store, and the
//! BrowserConfig finalizer controller.

pub mod controller;
pub mod merge;
pub mod store;

pub use merge::{resolve, ResolvedLaunchSpec};
pub use store::ConfigStore;
