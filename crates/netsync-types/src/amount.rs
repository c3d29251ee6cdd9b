//! 256-bit unsigned amounts.
//!
//! Capacities, balances, credit lines and TVL figures can exceed `u128`, so
//! they are carried as [`Amount`] (`primitive_types::U256`). On the wire an
//! amount is a decimal string. Decoding also accepts `0x`-prefixed hex
//! strings and plain JSON integers, since publishers differ in how they
//! encode big integers.
//!
//! Use as `#[serde(with = "crate::amount")]`, or
//! `#[serde(with = "crate::amount::option")]` for optional fields.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

/// Unsigned 256-bit integer used for every monetary quantity.
pub type Amount = primitive_types::U256;

/// Parse an amount from a decimal or `0x`-prefixed hexadecimal string.
///
/// Returns `None` if the text is empty or not a valid number in range.
pub fn parse(text: &str) -> Option<Amount> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => Amount::from_str_radix(hex, 16).ok(),
        None => Amount::from_dec_str(text).ok(),
    }
}

/// Serialize an amount as a decimal string.
pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Deserialize an amount from a string or an unsigned integer.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    deserializer.deserialize_any(AmountVisitor)
}

struct AmountVisitor;

impl Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal string, a 0x-prefixed hex string, or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        u64::try_from(v)
            .map(Amount::from)
            .map_err(|_err| E::custom(format!("negative amount: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        parse(v).ok_or_else(|| E::custom(format!("invalid amount: {v:?}")))
    }
}

/// Serde helpers for `Option<Amount>` fields.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Amount;

    #[derive(Deserialize)]
    struct Wrapped(#[serde(with = "crate::amount")] Amount);

    /// Serialize `Some(amount)` as a decimal string and `None` as `null`.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Amount>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(amount) => serializer.collect_str(amount),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional amount; `null` or a missing field yield `None`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Amount>, D::Error> {
        Option::<Wrapped>::deserialize(deserializer).map(|w| w.map(|Wrapped(a)| a))
    }
}
