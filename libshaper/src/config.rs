//! Configuration from the process environment.
//!
//! | variable             | meaning                                   | default  |
//! |----------------------|-------------------------------------------|----------|
//! | `SHAPER_READ_LIMIT`  | bytes per second                          | `1024`   |
//! | `SHAPER_INTERVAL`    | accounting interval, in microseconds      | `100000` |
//! | `SHAPER_DEBUG_LEVEL` | verbosity, `0` to `3`                     | `0`      |
//! | `SHAPER_FAMILY`      | `inet`, `inet6`, `unix` or a number       | `inet`   |
//! | `SHAPER_POLICY`      | `fixed` or `bucket`                       | `fixed`  |
//!
//! Invalid values never abort the host process: they are replaced by the default and reported
//! once logging is up.

use std::ffi::c_int;

use shaper_core::{AllotmentPolicy, ShaperOptions};

use crate::log::Verbosity;

pub const READ_LIMIT_VAR: &str = "SHAPER_READ_LIMIT";
pub const INTERVAL_VAR: &str = "SHAPER_INTERVAL";
pub const DEBUG_LEVEL_VAR: &str = "SHAPER_DEBUG_LEVEL";
pub const FAMILY_VAR: &str = "SHAPER_FAMILY";
pub const POLICY_VAR: &str = "SHAPER_POLICY";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}, using the default")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub shaper: ShaperOptions,
    pub verbosity: Verbosity,
    /// Values that were ignored.
    pub errors: Vec<ConfigError>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from `lookup`, which returns the value of a variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut errors = Vec::new();
        let defaults = ShaperOptions::default();

        let shaper = ShaperOptions {
            byte_limit: var(&lookup, READ_LIMIT_VAR, parse_positive, &mut errors)
                .unwrap_or(defaults.byte_limit),
            interval: var(&lookup, INTERVAL_VAR, parse_positive, &mut errors)
                .unwrap_or(defaults.interval),
            family: var(&lookup, FAMILY_VAR, parse_family, &mut errors).unwrap_or(defaults.family),
            policy: var(&lookup, POLICY_VAR, parse_policy, &mut errors).unwrap_or(defaults.policy),
        };

        let verbosity = var(&lookup, DEBUG_LEVEL_VAR, parse_verbosity, &mut errors)
            .unwrap_or_default();

        Self { shaper, verbosity, errors }
    }
}

/// Reads and parses `name`. Unparseable values are recorded in `errors`.
fn var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
    errors: &mut Vec<ConfigError>,
) -> Option<T> {
    let value = lookup(name)?;

    let parsed = parse(value.trim());
    if parsed.is_none() {
        errors.push(ConfigError { var: name, value });
    }

    parsed
}

fn parse_positive(value: &str) -> Option<u64> {
    value.parse().ok().filter(|&n| n > 0)
}

fn parse_verbosity(value: &str) -> Option<Verbosity> {
    value.parse().ok().and_then(Verbosity::from_level)
}

fn parse_family(value: &str) -> Option<c_int> {
    match value.to_ascii_lowercase().as_str() {
        "inet" | "ipv4" => Some(libc::AF_INET),
        "inet6" | "ipv6" => Some(libc::AF_INET6),
        "unix" | "local" => Some(libc::AF_UNIX),
        other => other.parse().ok().filter(|&family: &c_int| family >= 0),
    }
}

fn parse_policy(value: &str) -> Option<AllotmentPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "fixed" | "slice" => Some(AllotmentPolicy::FixedSlice),
        "bucket" | "token-bucket" => Some(AllotmentPolicy::TokenBucket),
        _ => None,
    }
}
