pub mod policy;
pub mod service;
pub mod validator;

pub use policy::{RiskPolicy, RiskPolicyUpdate};
pub use service::{AccountRiskSummary, RiskService};
pub use validator::{
    validate, AccountRiskState, OrderProposal, RiskCheck, RiskCheckResult, RiskChecks,
};
