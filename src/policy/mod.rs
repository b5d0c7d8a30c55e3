//! Request admission policies.
//!
//! Both checks look only at request headers and the path, and share no state:
//! - [`origin`]: cross-origin admission against the local exemption and allow-list
//! - [`maintenance`]: the maintenance-mode gate

pub mod maintenance;
pub mod origin;

pub use maintenance::{GateDecision, MaintenanceGate};
pub use origin::{AllowList, OriginDecision, OriginPolicy};
