//! Parsing of `rabbitmqctl list_users` output.
//!
//! Two listing formats exist. Brokers without tag support print
//! `name<whitespace>true|false`; newer brokers print `name [tag, tag]`.
//! Which one to expect is decided by the [`TagStrategy`], never by sniffing
//! the text.

use crate::types::{TagStrategy, UserSnapshot, UserTags};
use regex::Regex;
use std::sync::LazyLock;

/// Arguments for the user listing query.
pub const LIST_USERS_ARGS: &[&str] = &["-q", "list_users"];

static ADMIN_FLAG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(true|false)").expect("valid listing regex"));

static TAGGED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*?)\[(.*?)\]").expect("valid listing regex"));

/// Parse a full listing into a snapshot.
///
/// Lines that do not match the expected format are skipped. When a name
/// appears twice the later line wins.
pub fn parse_listing(text: &str, strategy: TagStrategy) -> UserSnapshot {
    let parse_line = match strategy {
        TagStrategy::Tagged => parse_tagged_line,
        TagStrategy::AdminFlag => parse_admin_flag_line,
    };

    let mut snapshot = UserSnapshot::new();
    for (name, tags) in text.lines().filter_map(parse_line) {
        snapshot.insert(name, tags);
    }
    snapshot
}

/// Parse `guest true`. The flag is the admin status; there are no custom tags.
pub fn parse_admin_flag_line(line: &str) -> Option<(String, UserTags)> {
    let caps = ADMIN_FLAG_LINE.captures(line)?;
    let name = caps.get(1)?.as_str().trim();
    let admin = caps.get(2)?.as_str() == "true";
    Some((
        name.to_string(),
        UserTags {
            admin,
            ..UserTags::default()
        },
    ))
}

/// Parse `guest [administrator, monitoring]`.
pub fn parse_tagged_line(line: &str) -> Option<(String, UserTags)> {
    let caps = TAGGED_LINE.captures(line)?;
    let name = caps.get(1)?.as_str().trim();
    if name.is_empty() {
        return None;
    }

    let tags = caps
        .get(2)?
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty());

    Some((name.to_string(), UserTags::from_tags(tags)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_line_splits_admin_from_custom() {
        let (name, tags) = parse_tagged_line("alice[administrator, monitoring]").unwrap();
        assert_eq!(name, "alice");
        assert!(tags.admin);
        assert_eq!(tags.sorted_custom(), vec!["monitoring"]);
    }

    #[test]
    fn test_tagged_line_with_tab_and_empty_list() {
        let (name, tags) = parse_tagged_line("guest\t[]").unwrap();
        assert_eq!(name, "guest");
        assert!(!tags.admin);
        assert!(tags.custom.is_empty());
    }

    #[test]
    fn test_tagged_line_trims_tokens() {
        let (_, tags) = parse_tagged_line("ops [ management ,  policymaker ]").unwrap();
        assert_eq!(tags.sorted_custom(), vec!["management", "policymaker"]);
    }

    #[test]
    fn test_tagged_line_without_brackets_is_skipped() {
        assert!(parse_tagged_line("Listing users ...").is_none());
        assert!(parse_tagged_line("[administrator]").is_none());
    }

    #[test]
    fn test_admin_flag_lines() {
        let (name, tags) = parse_admin_flag_line("bob true").unwrap();
        assert_eq!(name, "bob");
        assert!(tags.admin);
        assert!(tags.custom.is_empty());

        let (name, tags) = parse_admin_flag_line("carol\tfalse").unwrap();
        assert_eq!(name, "carol");
        assert!(!tags.admin);
    }

    #[test]
    fn test_admin_flag_line_rejects_other_values() {
        assert!(parse_admin_flag_line("dave yes").is_none());
        assert!(parse_admin_flag_line("   true").is_none());
    }

    #[test]
    fn test_parse_listing_tagged() {
        let text = "alice\t[administrator, monitoring]\nbob\t[]\nnot a user line\n";
        let snapshot = parse_listing(text, TagStrategy::Tagged);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("alice").unwrap().admin);
        assert!(!snapshot.get("bob").unwrap().admin);
    }

    #[test]
    fn test_parse_listing_admin_flag() {
        let text = "bob true\ncarol false\n";
        let snapshot = parse_listing(text, TagStrategy::AdminFlag);
        assert_eq!(snapshot.names().collect::<Vec<_>>(), vec!["bob", "carol"]);
        assert!(snapshot.get("bob").unwrap().admin);
        assert!(!snapshot.get("carol").unwrap().admin);
    }

    #[test]
    fn test_parse_listing_duplicate_last_wins() {
        let text = "alice [monitoring]\nalice [administrator]\n";
        let snapshot = parse_listing(text, TagStrategy::Tagged);
        let alice = snapshot.get("alice").unwrap();
        assert!(alice.admin);
        assert!(alice.custom.is_empty());
    }

    #[test]
    fn test_strategy_selects_format() {
        // A tagged listing read with the legacy parser yields nothing
        let snapshot = parse_listing("alice [administrator]", TagStrategy::AdminFlag);
        assert!(snapshot.is_empty());
    }
}
