//! Parsing helpers for the heterogeneous configuration values described
//! in §4.2: memory limits, restart policies, and container names.
//!
//! Each dynamic-shaped config field is modeled as a tagged variant during
//! parsing (see `crate::config`) and normalized here into its canonical
//! record.

use crate::error::{Error, Result};
use crate::types::RestartPolicy;

/// Parse a memory value with an optional `k`/`m`/`g` suffix (power of
/// 1024) into a byte count. Digits-only input is accepted as-is.
pub fn parse_memory(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::configuration("memory limit cannot be empty"));
    }

    let (digits, unit) = match s.rfind(|c: char| c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos + 1),
        None => return Err(Error::configuration(format!("invalid memory value '{s}'"))),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::configuration(format!("invalid memory value '{s}'")))?;

    let multiplier: u64 = match unit {
        "" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        other => {
            return Err(Error::configuration(format!(
                "unknown memory unit '{other}' in '{s}' (expected k, m, or g)"
            )));
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::configuration(format!("memory value '{s}' overflows u64")))
}

/// Format a byte count into its canonical `<int>[kmg]` form: the largest
/// unit that divides the value evenly, so that `parse_memory(format_memory(n)) == n`.
#[must_use]
pub fn format_memory(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes != 0 && bytes % GIB == 0 {
        format!("{}g", bytes / GIB)
    } else if bytes != 0 && bytes % MIB == 0 {
        format!("{}m", bytes / MIB)
    } else if bytes != 0 && bytes % KIB == 0 {
        format!("{}k", bytes / KIB)
    } else {
        bytes.to_string()
    }
}

/// Parse a `"name[:retries]"` restart policy string.
///
/// Per the resolved Open Question in SPEC_FULL.md, any malformed input
/// (unknown name, non-numeric retry count) is a `ConfigurationError` —
/// the `{"no", 0}` fallback is reserved for an empty/absent input only.
pub fn parse_restart_policy_str(s: &str) -> Result<RestartPolicy> {
    if s.is_empty() {
        return Ok(RestartPolicy::none());
    }

    let (name, retries) = match s.split_once(':') {
        Some((n, r)) => (n, r),
        None => (s, "0"),
    };

    if !RestartPolicy::is_valid_name(name) {
        return Err(Error::configuration(format!(
            "unknown restart policy '{name}' (expected one of {:?})",
            RestartPolicy::VALID_NAMES
        )));
    }

    let max_retries: u32 = retries
        .parse()
        .map_err(|_| Error::configuration(format!("invalid retry count '{retries}' in '{s}'")))?;

    Ok(RestartPolicy {
        name: name.to_string(),
        max_retries,
    })
}

/// Validate a container instance name against Docker's naming rules.
pub fn validate_container_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::configuration("container name cannot be empty"));
    }
    if name.len() > 63 {
        return Err(Error::configuration(
            "container name cannot exceed 63 characters",
        ));
    }
    let first = name.chars().next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(Error::configuration(
            "container name must start with an alphanumeric character",
        ));
    }
    for c in name.chars().skip(1) {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '.' && c != '-' {
            return Err(Error::configuration(format!(
                "container name '{name}' contains an invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory("512m").unwrap(), 536_870_912);
        assert_eq!(parse_memory("2g").unwrap(), 2_147_483_648);
        assert_eq!(parse_memory("1000").unwrap(), 1000);
        assert_eq!(parse_memory("64k").unwrap(), 65_536);
    }

    #[test]
    fn test_parse_memory_invalid_suffix() {
        assert!(parse_memory("10x").is_err());
        assert!(parse_memory("").is_err());
    }

    #[test]
    fn test_memory_round_trip_canonical_forms() {
        for (bytes, expected) in [
            (536_870_912u64, "512m"),
            (2_147_483_648, "2g"),
            (1000, "1000"),
            (65_536, "64k"),
        ] {
            let formatted = format_memory(bytes);
            assert_eq!(formatted, expected);
            assert_eq!(parse_memory(&formatted).unwrap(), bytes);
        }
    }

    #[test]
    fn test_restart_policy_parsing() {
        let p = parse_restart_policy_str("on-failure:3").unwrap();
        assert_eq!(p.name, "on-failure");
        assert_eq!(p.max_retries, 3);

        let p = parse_restart_policy_str("always").unwrap();
        assert_eq!(p.name, "always");
        assert_eq!(p.max_retries, 0);

        assert!(parse_restart_policy_str("bogus").is_err());

        let p = parse_restart_policy_str("").unwrap();
        assert_eq!(p, RestartPolicy::none());
    }

    #[test]
    fn test_validate_container_name() {
        assert!(validate_container_name("web1").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("-bad").is_err());
        assert!(validate_container_name("bad@name").is_err());
    }

    proptest::proptest! {
        #[test]
        fn test_memory_parse_format_round_trip(n in 0u64..=u64::MAX / (1024 * 1024 * 1024)) {
            let formatted = format_memory(n);
            let reparsed = parse_memory(&formatted).unwrap();
            proptest::prop_assert_eq!(reparsed, n);
        }
    }
}
