//! Broker version detection from `rabbitmqctl status` output.

use crate::types::BrokerVersion;
use regex::Regex;
use std::sync::LazyLock;

/// Arguments for the status query.
pub const STATUS_ARGS: &[&str] = &["-q", "status"];

static VERSION_TUPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""RabbitMQ","([\d.]+)""#).expect("valid version regex"));

/// Extract the broker version from status output.
///
/// The first line carrying a `"RabbitMQ","x.y.z"` tuple wins. Returns `None`
/// when no line matches or the matched version does not parse.
pub fn parse_status(status: &str) -> Option<BrokerVersion> {
    let captured = status
        .lines()
        .find_map(|line| VERSION_TUPLE.captures(line))?;
    let raw = captured.get(1)?.as_str();
    parse_dotted(raw)
}

/// Turn `3.8.9` into `3.89`.
///
/// The first component is the integer part; the remaining components are
/// concatenated into the fraction. `3` alone is `3.0`.
pub fn parse_dotted(raw: &str) -> Option<BrokerVersion> {
    let mut parts = raw.split('.');
    let major = parts.next().filter(|m| !m.is_empty())?;
    let minor: String = parts.collect();

    let numeric = if minor.is_empty() {
        major.to_string()
    } else {
        format!("{major}.{minor}")
    };

    numeric.parse::<f64>().ok().map(BrokerVersion)
}
