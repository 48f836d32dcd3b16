//! Core types for RabbitMQ user convergence.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// The reserved tag that marks a user as administrator.
///
/// It is never part of a user's custom tags: it is derived from, and folded
/// into, the `admin` flag.
pub const ADMIN_TAG: &str = "administrator";

/// First broker version that lists and sets arbitrary user tags.
///
/// Versions strictly greater than this one support tags.
pub const TAG_SUPPORT_THRESHOLD: f64 = 2.41;

/// Numeric broker version, ordered.
///
/// Derived from a dotted version string by keeping the first component as the
/// integer part and concatenating the rest as the fraction: `3.8.9` is `3.89`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BrokerVersion(pub f64);

impl BrokerVersion {
    /// Whether this version supports first-class user tags.
    pub fn supports_tags(&self) -> bool {
        self.0 > TAG_SUPPORT_THRESHOLD
    }
}

impl fmt::Display for BrokerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How user state is listed and mutated on this broker.
///
/// Selected once from the capability flag; every parse and write dispatches
/// on it instead of re-deriving the version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStrategy {
    /// `name [tag1, tag2]` listings, `set_user_tags` writes
    Tagged,
    /// `name true|false` listings, `set_admin`/`clear_admin` writes
    AdminFlag,
}

impl TagStrategy {
    /// Pick the strategy for a (possibly unknown) broker version.
    pub fn for_version(version: Option<BrokerVersion>) -> Self {
        match version {
            Some(v) if v.supports_tags() => Self::Tagged,
            _ => Self::AdminFlag,
        }
    }

    /// Whether custom tags can be represented at all.
    pub fn supports_tags(&self) -> bool {
        matches!(self, Self::Tagged)
    }
}

impl fmt::Display for TagStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tagged => write!(f, "tagged"),
            Self::AdminFlag => write!(f, "admin flag"),
        }
    }
}

/// Build the full tag set sent to the broker from custom tags and the admin flag.
pub fn effective_tags(custom: &BTreeSet<String>, admin: bool) -> BTreeSet<String> {
    let mut tags: BTreeSet<String> = custom.iter().filter(|t| *t != ADMIN_TAG).cloned().collect();
    if admin {
        tags.insert(ADMIN_TAG.to_string());
    }
    tags
}

/// Tags and admin status of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTags {
    /// Custom tags, never containing [`ADMIN_TAG`]
    pub custom: BTreeSet<String>,
    /// Whether the user carries the administrator tag
    pub admin: bool,
}

impl UserTags {
    /// Build from any tag list, folding the reserved tag into `admin`.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for tag in tags {
            let tag = tag.into();
            if tag == ADMIN_TAG {
                out.admin = true;
            } else {
                out.custom.insert(tag);
            }
        }
        out
    }

    /// Same custom tags with the admin flag replaced.
    pub fn with_admin(&self, admin: bool) -> Self {
        Self {
            custom: self.custom.clone(),
            admin,
        }
    }

    /// Full tag set, including the reserved tag when admin.
    pub fn effective(&self) -> BTreeSet<String> {
        effective_tags(&self.custom, self.admin)
    }

    /// Custom tags as a sorted list.
    pub fn sorted_custom(&self) -> Vec<String> {
        self.custom.iter().cloned().collect()
    }
}

/// Live users keyed by name, built from one full listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserSnapshot {
    users: BTreeMap<String, UserTags>,
}

impl UserSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user, replacing any earlier entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, tags: UserTags) {
        self.users.insert(name.into(), tags);
    }

    /// Look up a user.
    pub fn get(&self, name: &str) -> Option<&UserTags> {
        self.users.get(name)
    }

    /// Whether a user exists.
    pub fn contains(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    /// User names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// Iterate over users, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UserTags)> {
        self.users.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the snapshot has no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Whether a desired user should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// The user must exist
    #[default]
    Present,
    /// The user must not exist
    Absent,
}

/// A user as declared in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredUser {
    /// User name (unique key)
    pub name: String,
    /// Password, only used when the user is created
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Custom tags, without the reserved tag
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Whether the user should be administrator
    #[serde(default)]
    pub admin: bool,
    /// Whether the user should exist
    #[serde(default)]
    pub ensure: Ensure,
}

impl DesiredUser {
    /// Create a desired user with no tags, not admin, present.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
            tags: BTreeSet::new(),
            admin: false,
            ensure: Ensure::Present,
        }
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the custom tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the admin flag.
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Mark the user as absent.
    pub fn absent(mut self) -> Self {
        self.ensure = Ensure::Absent;
        self
    }

    /// Desired tags, sorted, for comparison with [`UserTags::sorted_custom`].
    pub fn sorted_tags(&self) -> Vec<String> {
        self.tags.iter().filter(|t| *t != ADMIN_TAG).cloned().collect()
    }
}

/// A live user bound to a catalog entry by name.
///
/// Carries only the name: listings never expose credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredUser {
    /// User name
    pub name: String,
}

/// A catalog entry: the desired user and, after prefetch, its live match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// The declared user
    pub desired: DesiredUser,
    /// The bound live user, if one was discovered
    pub provider: Option<DiscoveredUser>,
}

impl CatalogEntry {
    /// Create an unbound entry.
    pub fn new(desired: DesiredUser) -> Self {
        Self {
            desired,
            provider: None,
        }
    }

    /// Whether prefetch found this user on the broker.
    pub fn is_bound(&self) -> bool {
        self.provider.is_some()
    }
}

/// Desired users keyed by name.
pub type Catalog = BTreeMap<String, CatalogEntry>;

/// Build a catalog from desired users. Later duplicates replace earlier ones.
pub fn catalog_from<I: IntoIterator<Item = DesiredUser>>(users: I) -> Catalog {
    users
        .into_iter()
        .map(|u| (u.name.clone(), CatalogEntry::new(u)))
        .collect()
}

/// Difference between a desired user and the live broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Drift {
    /// Already converged
    InSync,
    /// User must be created
    Create {
        /// Tags the user will get
        tags: Vec<String>,
        /// Whether the user will be administrator
        admin: bool,
    },
    /// User must be deleted
    Destroy,
    /// User exists with different tags or admin flag
    Update {
        /// Live custom tags and desired custom tags, when they differ
        tags: Option<(Vec<String>, Vec<String>)>,
        /// Live admin flag and desired admin flag, when they differ
        admin: Option<(bool, bool)>,
    },
}

impl Drift {
    /// Whether applying would change anything.
    pub fn has_changes(&self) -> bool {
        !matches!(self, Self::InSync)
    }
}

/// Result of converging one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// User was created
    Created,
    /// Tags or admin flag were changed
    Modified,
    /// User was deleted
    Removed,
    /// Apply was skipped
    Skipped {
        /// Why nothing was applied
        reason: String,
    },
}

impl ApplyResult {
    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Configuration for bounded retries with a fixed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one
    pub step_delay: Duration,
    /// Deadline for each attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::readiness()
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_attempts: u32, step_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            step_delay,
            attempt_timeout,
        }
    }

    /// Create a retry policy, rejecting one that allows no attempts.
    pub fn try_new(max_attempts: u32, step_delay: Duration, attempt_timeout: Duration) -> Result<Self> {
        let policy = Self::new(max_attempts, step_delay, attempt_timeout);
        policy.validate()?;
        Ok(policy)
    }

    /// Check that the policy runs its operation at least once.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidPolicy {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The readiness gate defaults: 30 attempts, 6s apart, 10s each.
    pub fn readiness() -> Self {
        Self::new(30, Duration::from_secs(6), Duration::from_secs(10))
    }

    /// Total retry budget reported on exhaustion (`max_attempts * step_delay`).
    pub fn budget(&self) -> Duration {
        self.step_delay.saturating_mul(self.max_attempts)
    }
}
