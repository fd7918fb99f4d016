// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logical addresses and physical routes.
//!
//! An [`Address`] names a guest context independently of how it is reached.
//! A [`Route`] is the transport-level handle needed to physically deliver to
//! that context (the frame routing id of a nested frame, or the transport's
//! primary target).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire spelling of [`Address::Main`].
pub const MAIN_ADDRESS: &str = "Main";
/// Wire spelling of [`Address::Wildcard`].
pub const WILDCARD_ADDRESS: &str = "*";

/// Logical target of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Address {
    /// The primary context of the guest.
    Main,
    /// Any context; broadcast on send, match-all on listen.
    Wildcard,
    /// A specific nested context, by opaque id.
    Named(String),
}

impl Address {
    pub fn named(id: impl Into<String>) -> Self {
        Self::from(id.into())
    }

    /// Mint a fresh id for a nested context.
    pub fn mint() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::Named(format!("uuid_{}", &id[..16]))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main)
    }

    /// Listener-side matching: a wildcard pattern accepts every address.
    pub fn accepts(&self, other: &Address) -> bool {
        self.is_wildcard() || self == other
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Main => MAIN_ADDRESS,
            Self::Wildcard => WILDCARD_ADDRESS,
            Self::Named(id) => id,
        }
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            MAIN_ADDRESS => Self::Main,
            WILDCARD_ADDRESS => Self::Wildcard,
            _ => Self::Named(raw),
        }
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        match address {
            Address::Named(id) => id,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical delivery handle behind an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Route {
    /// The transport's default target (the guest's primary context).
    Primary,
    /// A frame reachable by routing id.
    Frame(i64),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Frame(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for Route {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "primary" {
            return Ok(Self::Primary);
        }
        s.parse::<i64>().map(Self::Frame)
    }
}
