// Inspection
pub mod status;
pub mod users;

// Convergence
pub mod converge;
pub mod wait;

use anyhow::{Context as AnyhowContext, Result};
use rabbitkit::Reconciler;
use rabbitkit::backend::rabbitmqctl::CtlBackend;
use std::path::PathBuf;

use crate::Context;
use crate::config::{self, CatalogFile, Settings};

/// Load the catalog file named by `--file`, or the default one.
///
/// A missing default file is not an error for commands that only need
/// settings; `required` makes it one.
pub fn load_catalog(file: Option<&str>, required: bool) -> Result<CatalogFile> {
    let path = config::resolve_path(file)?;
    if required || file.is_some() {
        CatalogFile::load(&path)
    } else {
        CatalogFile::load_or_default(&path)
    }
}

/// Build a reconciler from CLI overrides and catalog settings.
///
/// `--ctl`/`--home` (or their environment variables) win over the catalog's
/// `[settings]`, which win over discovery and defaults.
pub fn reconciler(ctx: &Context, settings: &Settings) -> Result<Reconciler> {
    let ctl = ctx
        .ctl
        .as_deref()
        .map(|c| PathBuf::from(shellexpand::tilde(c).as_ref()))
        .or_else(|| settings.ctl_path());

    let mut backend = match ctl {
        Some(path) => CtlBackend::with_path(&path)
            .with_context(|| format!("rabbitmqctl not found at {}", path.display()))?,
        None => CtlBackend::new().context("Could not locate rabbitmqctl")?,
    };

    let home = ctx
        .home
        .as_deref()
        .map(|h| PathBuf::from(shellexpand::tilde(h).as_ref()))
        .or_else(|| settings.home_path());
    if let Some(home) = home {
        backend = backend.with_home(home);
    }

    log::debug!("Using {}", backend.ctl_path().display());

    let mut reconciler = Reconciler::with_backend(Box::new(backend));
    if let Some(timeout) = settings.command_timeout() {
        reconciler = reconciler.with_command_timeout(timeout);
    }
    Ok(reconciler)
}
