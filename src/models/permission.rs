use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// A permission granted to a linked game account's API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Account,
    Builds,
    Characters,
    Guilds,
    Inventories,
    Progression,
    Pvp,
    Tradingpost,
    Unlocks,
    Wallet,
    Wvw,
}

/// Bit positions. Append only: existing entries must never move.
pub const TABLE: [Permission; 11] = [
    Permission::Account,
    Permission::Builds,
    Permission::Characters,
    Permission::Guilds,
    Permission::Inventories,
    Permission::Progression,
    Permission::Pvp,
    Permission::Tradingpost,
    Permission::Unlocks,
    Permission::Wallet,
    Permission::Wvw,
];

impl Permission {
    /// The wire name of the permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Account => "account",
            Permission::Builds => "builds",
            Permission::Characters => "characters",
            Permission::Guilds => "guilds",
            Permission::Inventories => "inventories",
            Permission::Progression => "progression",
            Permission::Pvp => "pvp",
            Permission::Tradingpost => "tradingpost",
            Permission::Unlocks => "unlocks",
            Permission::Wallet => "wallet",
            Permission::Wvw => "wvw",
        }
    }

    /// The bit index of this permission in [`TABLE`].
    pub fn position(&self) -> u32 {
        TABLE
            .iter()
            .position(|p| p == self)
            .map(|i| i as u32)
            .unwrap_or_default()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TABLE
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::Format(format!("unknown permission: {}", s)))
    }
}

/// Packs permissions into a bitset.
pub fn to_bitset(permissions: &[Permission]) -> u32 {
    permissions
        .iter()
        .fold(0u32, |bits, p| bits | (1 << p.position()))
}

/// Packs permission names into a bitset, silently ignoring unknown names.
pub fn to_bitset_from_names<S: AsRef<str>>(names: &[S]) -> u32 {
    let permissions: Vec<Permission> = names
        .iter()
        .filter_map(|name| name.as_ref().parse().ok())
        .collect();

    to_bitset(&permissions)
}

/// Unpacks a bitset in table order. Bits beyond the table are ignored.
pub fn from_bitset(bits: u32) -> Vec<Permission> {
    TABLE
        .iter()
        .enumerate()
        .filter(|(i, _)| bits & (1 << i) != 0)
        .map(|(_, p)| *p)
        .collect()
}
