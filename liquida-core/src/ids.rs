use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! int_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }
    };
}

int_id!(
    /// Reseller that owns agents, venues and leads.
    TenantId
);
int_id!(
    /// Product section (electricity, gas, telephony, ...).
    SectionId
);
int_id!(SubSectionId);
int_id!(AgentId);
int_id!(
    /// Venue ("lugar") where a sale was captured.
    VenueId
);
int_id!(ContractId);
int_id!(
    /// Authenticated user performing an operation.
    ActorId
);
int_id!(RuleId);
