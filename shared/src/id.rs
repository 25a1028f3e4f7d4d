use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid address: {0}")]
pub struct InvalidAddress(pub String);

/// A 20-byte account address, stored lowercase with its `0x` prefix.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address left-padded to a 32-byte ABI word, without `0x`.
    pub fn to_abi_word(&self) -> String {
        format!("{:0>64}", &self.0[2..])
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_lowercase();
        let valid = lower.len() == 42
            && lower.starts_with("0x")
            && lower[2..].chars().all(|c| c.is_ascii_hexdigit());

        if valid {
            Ok(Self(lower))
        } else {
            Err(InvalidAddress(value.to_owned()))
        }
    }
}

impl TryFrom<String> for Address {
    type Error = InvalidAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::from_str(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_normalised() {
        let address =
            Address::from_str("0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2")
                .unwrap();

        assert_eq!(
            address.as_str(),
            "0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2"
        );
        assert_eq!(
            address.to_abi_word(),
            "00000000000000000000000087870bca3f3fd6335c3f4ce8392d69350b4fa4e2"
        );
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert!(Address::from_str("0x1234").is_err());
        assert!(Address::from_str(
            "87870bca3f3fd6335c3f4ce8392d69350b4fa4e2aa"
        )
        .is_err());
        assert!(Address::from_str(
            "0xz7870bca3f3fd6335c3f4ce8392d69350b4fa4e2"
        )
        .is_err());
    }
}
