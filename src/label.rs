//! Build labels identifying the upstream release an extraction belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("invalid build label '{label}': {reason}")]
    Invalid { label: String, reason: &'static str },
}

/// Upstream build label, `YYYY.MM.DD.hh.mm/<hash>`.
///
/// The hash may be empty but never contains whitespace.
///
/// # Examples
///
/// ```
/// use package_extractor::BuildLabel;
///
/// let label: BuildLabel = "2021.05.14.15.26/a1b2c3".parse().unwrap();
/// assert_eq!(label.build_date(), "2021.05.14.15.26");
/// assert_eq!(label.build_hash(), "a1b2c3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildLabel {
    raw: String,
}

const DATE_LEN: usize = 16;

impl BuildLabel {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The `YYYY.MM.DD.hh.mm` part.
    pub fn build_date(&self) -> &str {
        &self.raw[..DATE_LEN]
    }

    /// Everything after the `/`.
    pub fn build_hash(&self) -> &str {
        &self.raw[DATE_LEN + 1..]
    }

    /// Packs the date groups into one sortable integer, twelve bits per
    /// group with the year in the top bits.
    pub fn to_ordinal(&self) -> u64 {
        self.build_date()
            .split('.')
            .enumerate()
            .map(|(i, part)| part.parse::<u64>().unwrap_or(0) << (48 - 12 * i))
            .fold(0, |acc, v| acc | v)
    }

    fn validate(raw: &str) -> Result<(), &'static str> {
        let (date, hash) = raw.split_once('/').ok_or("missing '/' separator")?;
        if hash.chars().any(char::is_whitespace) {
            return Err("hash contains whitespace");
        }

        let mut groups = date.split('.');
        let year = groups.next().unwrap_or_default();
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err("year must be four digits");
        }
        let rest: Vec<&str> = groups.collect();
        if rest.len() != 4 {
            return Err("date must have five dot-separated groups");
        }
        if rest
            .iter()
            .any(|g| g.len() != 2 || !g.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err("date groups after the year must be two digits");
        }
        Ok(())
    }
}

impl FromStr for BuildLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s).map_err(|reason| LabelError::Invalid {
            label: s.to_string(),
            reason,
        })?;
        Ok(Self { raw: s.to_string() })
    }
}

impl TryFrom<String> for BuildLabel {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BuildLabel> for String {
    fn from(label: BuildLabel) -> Self {
        label.raw
    }
}

impl fmt::Display for BuildLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_label() {
        let label: BuildLabel = "2023.10.25.17.48/NXcTQ9ZPbIIZ4ljWFLE0cQ".parse().unwrap();
        assert_eq!(label.build_date(), "2023.10.25.17.48");
        assert_eq!(label.build_hash(), "NXcTQ9ZPbIIZ4ljWFLE0cQ");
        assert_eq!(label.to_string(), "2023.10.25.17.48/NXcTQ9ZPbIIZ4ljWFLE0cQ");
    }

    #[test]
    fn test_empty_hash_is_allowed() {
        let label: BuildLabel = "2023.10.25.17.48/".parse().unwrap();
        assert_eq!(label.build_hash(), "");
    }

    #[test]
    fn test_rejects_malformed_labels() {
        for bad in [
            "2023.10.25.17.48",
            "23.10.25.17.48/abc",
            "2023.10.25.17/abc",
            "2023.10.25.17.48.00/abc",
            "2023.1.25.17.48/abc",
            "2023.10.25.17.4x/abc",
            "2023.10.25.17.48/ab c",
            "",
        ] {
            assert!(bad.parse::<BuildLabel>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_ordinal_orders_by_date() {
        let older: BuildLabel = "2023.10.25.17.48/x".parse().unwrap();
        let newer: BuildLabel = "2023.11.01.09.05/a".parse().unwrap();
        assert!(older.to_ordinal() < newer.to_ordinal());

        let exact: BuildLabel = "2023.10.25.17.48/".parse().unwrap();
        let expected = (2023u64 << 48) | (10 << 36) | (25 << 24) | (17 << 12) | 48;
        assert_eq!(exact.to_ordinal(), expected);
    }

    #[test]
    fn test_serde_validates() {
        let label: BuildLabel = serde_json::from_str(r#""2023.10.25.17.48/abc""#).unwrap();
        assert_eq!(serde_json::to_string(&label).unwrap(), r#""2023.10.25.17.48/abc""#);
        assert!(serde_json::from_str::<BuildLabel>(r#""not a label""#).is_err());
    }
}
