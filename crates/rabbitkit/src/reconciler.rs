//! Convergence of desired users against the live broker.
//!
//! The [`Reconciler`] owns the backend and the two process-lifetime caches
//! (broker version and user snapshot). Both caches sit behind one mutex and
//! are only recomputed on demand: callers that just changed broker state and
//! need a fresh view call [`Reconciler::invalidate_users`] or
//! [`Reconciler::refresh`].
//!
//! Per-user verbs live on [`UserProvider`], obtained with
//! [`Reconciler::user`].

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::parser::{self, LIST_USERS_ARGS};
use crate::retry::{self, RetryCallback};
use crate::types::{
    ApplyResult, BrokerVersion, Catalog, DesiredUser, DiscoveredUser, Drift, Ensure, RetryPolicy,
    TagStrategy, UserSnapshot, UserTags,
};
use crate::version::{self, STATUS_ARGS};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default deadline for a single routine rabbitmqctl call.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Cache {
    /// `None` until probed; `Some(None)` when the probe found no version
    version: Option<Option<BrokerVersion>>,
    users: Option<UserSnapshot>,
}

/// Reads and converges broker users through a [`Backend`].
pub struct Reconciler {
    backend: Box<dyn Backend>,
    command_timeout: Duration,
    cache: Mutex<Cache>,
}

impl Reconciler {
    /// Create a reconciler driving the rabbitmqctl found on this host.
    ///
    /// Returns an error if rabbitmqctl is not installed.
    pub fn new() -> Result<Self> {
        let backend = crate::backend::default_backend()?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    /// Create a reconciler with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Set the deadline for routine (non-retried) calls.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run one routine command. Failures propagate; nothing is retried.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        self.backend.run(args, self.command_timeout)
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // =========================================================================
    // Version probe
    // =========================================================================

    /// The broker version, probed once and cached.
    ///
    /// `None` means the version is unknown: the status query failed or its
    /// output had no recognizable version. That is not an error.
    pub fn version(&self) -> Option<BrokerVersion> {
        let mut cache = self.lock();
        self.cached_version(&mut cache)
    }

    /// Drop the cached version and probe again.
    pub fn version_with_renew(&self) -> Option<BrokerVersion> {
        let mut cache = self.lock();
        cache.version = None;
        self.cached_version(&mut cache)
    }

    /// Whether the broker supports arbitrary user tags.
    pub fn tag_support(&self) -> bool {
        self.version().is_some_and(|v| v.supports_tags())
    }

    /// The listing and mutation strategy for this broker.
    pub fn tag_strategy(&self) -> TagStrategy {
        TagStrategy::for_version(self.version())
    }

    fn cached_version(&self, cache: &mut Cache) -> Option<BrokerVersion> {
        if let Some(version) = cache.version {
            return version;
        }

        let version = match self.run(STATUS_ARGS) {
            Ok(status) => version::parse_status(&status),
            Err(e) => {
                log::debug!("Could not query broker status, version unknown: {e}");
                None
            }
        };
        log::debug!(
            "RabbitMQ version: {}",
            version.map_or_else(|| "unknown".to_string(), |v| v.to_string())
        );

        cache.version = Some(version);
        version
    }

    // =========================================================================
    // User snapshot
    // =========================================================================

    /// Live users, listed once and cached.
    pub fn users(&self) -> Result<UserSnapshot> {
        let mut cache = self.lock();
        self.cached_users(&mut cache)
    }

    /// Drop the cached snapshot and list users again.
    pub fn users_with_renew(&self) -> Result<UserSnapshot> {
        let mut cache = self.lock();
        cache.users = None;
        self.cached_users(&mut cache)
    }

    /// Drop the cached snapshot. The next read lists users again.
    pub fn invalidate_users(&self) {
        self.lock().users = None;
    }

    /// Drop both the cached version and the cached snapshot.
    pub fn refresh(&self) {
        let mut cache = self.lock();
        cache.version = None;
        cache.users = None;
    }

    fn cached_users(&self, cache: &mut Cache) -> Result<UserSnapshot> {
        if let Some(users) = &cache.users {
            return Ok(users.clone());
        }

        let strategy = TagStrategy::for_version(self.cached_version(cache));
        let listing = self.run(LIST_USERS_ARGS)?;
        let users = parser::parse_listing(&listing, strategy);
        log::debug!("Listed {} users ({strategy} format)", users.len());

        cache.users = Some(users.clone());
        Ok(users)
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// One discovered record per live user.
    pub fn instances(&self) -> Result<Vec<DiscoveredUser>> {
        Ok(self
            .users()?
            .names()
            .map(|name| DiscoveredUser {
                name: name.to_string(),
            })
            .collect())
    }

    /// Bind catalog entries to live users with the same name.
    ///
    /// Entries with no live match stay (or become) unbound. Returns the number
    /// of bound entries.
    pub fn prefetch(&self, catalog: &mut Catalog) -> Result<usize> {
        log::debug!("Call: prefetch rabbitmq users");
        let present = self.instances()?;

        let mut bound = 0;
        for (name, entry) in catalog.iter_mut() {
            entry.provider = present.iter().find(|p| &p.name == name).cloned();
            if entry.provider.is_some() {
                bound += 1;
            }
        }
        Ok(bound)
    }

    /// Per-user operations for a desired user.
    pub fn user<'a>(&'a self, resource: &'a DesiredUser) -> UserProvider<'a> {
        UserProvider {
            reconciler: self,
            resource,
        }
    }

    // =========================================================================
    // Retries
    // =========================================================================

    /// Wait until the broker answers `list_users` and `list_channels`.
    ///
    /// Both queries share one per-attempt deadline. A broken or still-forming
    /// cluster can hang on `list_channels` indefinitely; the deadline kills it.
    /// Returns how long the broker took to become ready.
    pub fn wait_for_ready(
        &self,
        policy: &RetryPolicy,
        callback: Option<&dyn RetryCallback>,
    ) -> Result<Duration> {
        let started = Instant::now();
        retry::with_retry("RabbitMQ readiness check", policy, callback, |deadline| {
            self.backend.run(&["list_users"], deadline.remaining())?;
            self.backend.run(&["list_channels"], deadline.remaining())?;
            Ok(())
        })?;

        let elapsed = started.elapsed();
        log::debug!("RabbitMQ is online after {} seconds", elapsed.as_secs());
        Ok(elapsed)
    }

    /// Run one command until it succeeds, within `policy`.
    pub fn run_with_retries(
        &self,
        args: &[&str],
        policy: &RetryPolicy,
        callback: Option<&dyn RetryCallback>,
    ) -> Result<String> {
        let operation = crate::backend::command_line(&self.backend.program(), args);
        let output = retry::with_retry(&operation, policy, callback, |deadline| {
            self.backend.run(args, deadline.remaining())
        })?;
        log::debug!("Command succeeded: {operation}");
        Ok(output)
    }

    // =========================================================================
    // Convergence
    // =========================================================================

    /// What converging `desired` would change, without changing anything.
    pub fn plan(&self, desired: &DesiredUser) -> Result<Drift> {
        let users = self.users()?;
        let live = users.get(&desired.name);

        let drift = match (desired.ensure, live) {
            (Ensure::Absent, None) => Drift::InSync,
            (Ensure::Absent, Some(_)) => Drift::Destroy,
            (Ensure::Present, None) => Drift::Create {
                tags: desired.sorted_tags(),
                admin: desired.admin,
            },
            (Ensure::Present, Some(live)) => {
                let live_tags = live.sorted_custom();
                let wanted_tags = desired.sorted_tags();
                // Custom tags only exist on brokers that can store them
                let tags = (self.tag_strategy().supports_tags() && live_tags != wanted_tags)
                    .then_some((live_tags, wanted_tags));
                let admin = (live.admin != desired.admin).then_some((live.admin, desired.admin));

                if tags.is_none() && admin.is_none() {
                    Drift::InSync
                } else {
                    Drift::Update { tags, admin }
                }
            }
        };
        Ok(drift)
    }

    /// Bring one user to its desired state.
    ///
    /// Renews the snapshot after every write so each step decides on fresh
    /// state: tags first, then the admin flag.
    pub fn converge(&self, desired: &DesiredUser) -> Result<ApplyResult> {
        let provider = self.user(desired);

        let result = match self.plan(desired)? {
            Drift::InSync => ApplyResult::NoChange,
            Drift::Destroy => {
                provider.destroy()?;
                self.invalidate_users();
                ApplyResult::Removed
            }
            Drift::Create { .. } => {
                provider.create()?;
                self.invalidate_users();
                ApplyResult::Created
            }
            Drift::Update { tags, .. } => {
                if tags.is_some() {
                    provider.set_tags(&desired.tags)?;
                    self.invalidate_users();
                }
                if provider.admin()? != desired.admin {
                    provider.set_admin(desired.admin)?;
                    self.invalidate_users();
                }
                ApplyResult::Modified
            }
        };

        log::debug!("Converged user '{}': {:?}", desired.name, result);
        Ok(result)
    }
}

/// Operations on one user, bound to its desired definition.
pub struct UserProvider<'a> {
    reconciler: &'a Reconciler,
    resource: &'a DesiredUser,
}

impl UserProvider<'_> {
    fn name(&self) -> &str {
        &self.resource.name
    }

    /// Live tags of this user, empty if it does not exist.
    pub fn live_tags(&self) -> Result<UserTags> {
        Ok(self
            .reconciler
            .users()?
            .get(self.name())
            .cloned()
            .unwrap_or_default())
    }

    /// Check if this user exists. `renew` lists users again first.
    pub fn exists(&self, renew: bool) -> Result<bool> {
        log::debug!("Call: exists? rabbitmq_user '{}'", self.name());
        let users = if renew {
            self.reconciler.users_with_renew()?
        } else {
            self.reconciler.users()?
        };
        let out = users.contains(self.name());
        log::debug!("Return: {out}");
        Ok(out)
    }

    /// Create this user and set its tags.
    ///
    /// The tag write follows the user creation without rollback: if it
    /// fails the user exists with default tags until the next run.
    pub fn create(&self) -> Result<()> {
        log::debug!("Call: create rabbitmq_user '{}'", self.name());
        let password = self
            .resource
            .password
            .as_deref()
            .ok_or_else(|| Error::MissingPassword {
                name: self.name().to_string(),
            })?;

        self.reconciler.run(&["add_user", self.name(), password])?;
        self.set_tags(&self.resource.tags)
    }

    /// Delete this user.
    pub fn destroy(&self) -> Result<()> {
        log::debug!("Call: destroy rabbitmq_user '{}'", self.name());
        self.reconciler.run(&["delete_user", self.name()])?;
        Ok(())
    }

    /// Custom tags of this user, sorted, without the administrator tag.
    pub fn tags(&self) -> Result<Vec<String>> {
        log::debug!("Call: tags rabbitmq_user '{}'", self.name());
        let out = self.live_tags()?.sorted_custom();
        log::debug!("Return: {out:?}");
        Ok(out)
    }

    /// Set the custom tags of this user.
    ///
    /// The administrator tag is kept when the user is administrator now or is
    /// declared `admin`.
    pub fn set_tags(&self, tags: &BTreeSet<String>) -> Result<()> {
        log::debug!("Call: tags= rabbitmq_user '{}' with {tags:?}", self.name());
        let admin = self.live_tags()?.admin || self.resource.admin;
        let target = UserTags::from_tags(tags.iter().cloned()).with_admin(admin);
        self.write(&target)
    }

    /// Whether this user is administrator.
    pub fn admin(&self) -> Result<bool> {
        log::debug!("Call: admin rabbitmq_user '{}'", self.name());
        let out = self.live_tags()?.admin;
        log::debug!("Return: {out}");
        Ok(out)
    }

    /// Make this user administrator, or revoke it, keeping its custom tags.
    pub fn set_admin(&self, admin: bool) -> Result<()> {
        log::debug!("Call: admin= rabbitmq_user '{}' with {admin}", self.name());
        let target = self.live_tags()?.with_admin(admin);
        self.write(&target)
    }

    /// Send `target` to the broker using the strategy it supports.
    fn write(&self, target: &UserTags) -> Result<()> {
        match self.reconciler.tag_strategy() {
            TagStrategy::Tagged => {
                let tags = target.effective();
                let mut args = vec!["set_user_tags", self.name()];
                args.extend(tags.iter().map(String::as_str));
                self.reconciler.run(&args)?;
            }
            TagStrategy::AdminFlag => {
                // Custom tags cannot be represented; only the admin bit survives
                let verb = if target.admin { "set_admin" } else { "clear_admin" };
                self.reconciler.run(&[verb, self.name()])?;
            }
        }
        Ok(())
    }
}
