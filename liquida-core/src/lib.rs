//! Domain vocabulary shared by every Liquida crate: identifiers, actors and
//! their capabilities, commission rules and the contracts they apply to.

pub mod access;
pub mod contract;
pub mod ids;
pub mod money;
pub mod rule;

pub use access::{AccessDenied, Actor, Policy, Role};
pub use contract::{Contract, ContractState};
pub use ids::{ActorId, AgentId, ContractId, RuleId, SectionId, SubSectionId, TenantId, VenueId};
pub use money::{clamp_between, round_amount};
pub use rule::{CommissionRule, InvalidRule, PayoutMode, Tier};
