use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::QuotaError;

/// Product tier a user is subscribed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    #[default]
    Free,
    Pro,
    Premium,
    Enterprise,
}

/// Fixed limits attached to a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub daily_limit: u32,
    pub monthly_limit: u32,
    pub priority_bonus: i32,
    pub cache_access: bool,
}

impl TierName {
    pub const ALL: [TierName; 4] = [
        TierName::Free,
        TierName::Pro,
        TierName::Premium,
        TierName::Enterprise,
    ];

    pub fn limits(self) -> TierLimits {
        match self {
            TierName::Free => TierLimits {
                daily_limit: 10,
                monthly_limit: 200,
                priority_bonus: 0,
                cache_access: false,
            },
            TierName::Pro => TierLimits {
                daily_limit: 50,
                monthly_limit: 1000,
                priority_bonus: 1,
                cache_access: true,
            },
            TierName::Premium => TierLimits {
                daily_limit: 200,
                monthly_limit: 5000,
                priority_bonus: 2,
                cache_access: true,
            },
            TierName::Enterprise => TierLimits {
                daily_limit: 1000,
                monthly_limit: 20000,
                priority_bonus: 3,
                cache_access: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierName::Free => "free",
            TierName::Pro => "pro",
            TierName::Premium => "premium",
            TierName::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for TierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierName {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(TierName::Free),
            "pro" => Ok(TierName::Pro),
            "premium" => Ok(TierName::Premium),
            "enterprise" => Ok(TierName::Enterprise),
            other => Err(QuotaError::UnknownTier(other.to_string())),
        }
    }
}

/// Per-user tier row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserTier {
    pub user_id: String,
    pub tier_name: TierName,
    pub daily_limit: u32,
    pub monthly_limit: u32,
    /// Reserved for scheduling; not consulted by quota decisions
    pub priority_bonus: i32,
    pub cache_access: bool,
}

impl UserTier {
    pub fn new(user_id: impl Into<String>, tier: TierName) -> Self {
        let limits = tier.limits();
        Self {
            user_id: user_id.into(),
            tier_name: tier,
            daily_limit: limits.daily_limit,
            monthly_limit: limits.monthly_limit,
            priority_bonus: limits.priority_bonus,
            cache_access: limits.cache_access,
        }
    }

    /// Same user, limits replaced by the given tier's
    pub fn upgraded(&self, tier: TierName) -> Self {
        Self::new(self.user_id.clone(), tier)
    }
}
