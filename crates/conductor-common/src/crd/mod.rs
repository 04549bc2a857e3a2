//! Custom Resource Definitions owned by conductor

mod platform;
mod types;

pub use platform::{
    ComponentCondition, ComponentPhase, ComponentStatus, Platform, PlatformPhase, PlatformSpec,
    PlatformStatus,
};
pub use types::{Condition, ConditionStatus};
