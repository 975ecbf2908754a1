//! Shadow index builds and the atomic switch.

mod manager;
mod swap;
mod validation;

pub use manager::{MonitorReport, ShadowIndexManager, SwitchRecord, SwitchRequest, SwitchResult};
pub use swap::{DirStats, FsIndexSwapper, IndexSwapper, SwapOutcome, SwapPlan};
pub use validation::{validate_shadow, ValidationCheck, ValidationPolicy, ValidationReport};
