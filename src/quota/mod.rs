mod service;
mod tier;
mod usage;

pub use service::{
    LimitKind, QuotaDecision, QuotaService, QuotaSnapshot, Remaining, UsagePercentage,
};
pub use tier::{TierLimits, TierName, UserTier};
pub use usage::UsageStats;
