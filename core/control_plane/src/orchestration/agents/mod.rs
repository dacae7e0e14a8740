pub mod compliance_agent;
pub mod revenue_agent;

pub use compliance_agent::{ComplianceAgent, ComplianceResult};
pub use revenue_agent::{ActionSequence, RevenueAgent};
