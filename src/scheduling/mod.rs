//! Downlink scheduling module
//!
//! This module resolves downlink paths, computes concrete RX1/RX2 settings
//! from transmission requests and frequency plans, and routes downlinks to
//! live gateway connections.

pub mod frequency_plan;
pub mod scheduler;

pub use self::frequency_plan::{FrequencyPlan, FrequencyPlanStore, InMemoryFrequencyPlans, EU_863_870};
pub use self::scheduler::{compute_tx_settings, DownlinkScheduler, ResolvedPath, RxWindow, ScheduleResult};
