//! Data models for accounts and currencies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{AccountId, UserId};

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Created,
    Normal,
    Locked,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Created => "created",
            AccountStatus::Normal => "normal",
            AccountStatus::Locked => "locked",
            AccountStatus::Disabled => "disabled",
        }
    }

    /// Setting the current status again is always allowed (no-op).
    pub fn can_transition_to(&self, next: AccountStatus) -> bool {
        use AccountStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Created, Normal)
                | (Created, Disabled)
                | (Normal, Locked)
                | (Normal, Disabled)
                | (Locked, Normal)
                | (Locked, Disabled)
        )
    }

    /// Ledger appends are refused on disabled accounts
    #[inline]
    pub fn accepts_operations(&self) -> bool {
        !matches!(self, AccountStatus::Disabled)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AccountStatus::Created),
            "normal" => Ok(AccountStatus::Normal),
            "locked" => Ok(AccountStatus::Locked),
            "disabled" => Ok(AccountStatus::Disabled),
            _ => Err(format!("Invalid account status: {}", s)),
        }
    }
}

/// Currency metadata, owned by an external service. The core only needs to
/// know that a currency exists and is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub name: String,
    pub available: bool,
}

impl Currency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
        }
    }
}

/// Account, created once per (user, currency, name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub currency: String,
    pub name: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use AccountStatus::*;
        assert!(Created.can_transition_to(Created));
        assert!(Created.can_transition_to(Normal));
        assert!(Normal.can_transition_to(Locked));
        assert!(Locked.can_transition_to(Normal));
        assert!(Disabled.can_transition_to(Disabled));

        assert!(!Normal.can_transition_to(Created));
        assert!(!Disabled.can_transition_to(Normal));
        assert!(!Created.can_transition_to(Locked));
    }

    #[test]
    fn test_status_parse_is_strict() {
        assert_eq!("normal".parse::<AccountStatus>(), Ok(AccountStatus::Normal));
        assert!("Normal".parse::<AccountStatus>().is_err());
        assert!("".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_disabled_refuses_operations() {
        assert!(AccountStatus::Normal.accepts_operations());
        assert!(AccountStatus::Locked.accepts_operations());
        assert!(!AccountStatus::Disabled.accepts_operations());
    }
}
