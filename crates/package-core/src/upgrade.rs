//! Versioned migration chain applied to a raw archive before it is read.
//!
//! # Ordering
//! Steps are grouped by package-format version, ascending. Inside a group the
//! package-level step (at most one) runs first, then the application-level steps
//! ordered by application version.
//!
//! # Invariants
//! - A package-format version has at most one package-level step.
//! - An application version appears at most once in the whole chain.
//! - A step is pending only if its version is strictly greater than the
//!   version the document was opened with, so re-opening an upgraded document
//!   schedules nothing.

use crate::archive::{Archive, ArchiveError};
use crate::version::Version;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("A package upgrade step to {0} is already registered")]
    DuplicatePackageStep(Version),

    #[error("An application upgrade step to {version} is already registered (format {existing_format})")]
    DuplicateApplicationStep {
        version: Version,
        existing_format: Version,
    },

    #[error("Upgrade step {step} declined to upgrade the document")]
    Declined { step: StepKey },

    #[error("Upgrade step {step} failed: {source}")]
    Failed {
        step: StepKey,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, UpgradeError>;

/// What a step upgrades, and to which version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKey {
    Package { to: Version },
    Application { format: Version, to: Version },
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKey::Package { to } => write!(f, "package {}", to),
            StepKey::Application { format, to } => write!(f, "application {} (format {})", to, format),
        }
    }
}

/// Mutable view of the document handed to a step.
pub struct UpgradeContext<'a> {
    archive: &'a mut Archive,
    application_name: &'a str,
    from: Version,
    to: Version,
}

impl<'a> UpgradeContext<'a> {
    /// Version the document is being upgraded from (package or application, per step kind).
    pub fn from(&self) -> Version {
        self.from
    }

    pub fn to(&self) -> Version {
        self.to
    }

    pub fn application_name(&self) -> &str {
        self.application_name
    }

    /// The whole raw archive, for steps that reshape the container itself.
    pub fn archive(&mut self) -> &mut Archive {
        self.archive
    }

    fn app_entry(&self, name: &str) -> String {
        format!("{}/{}", self.application_name, name.trim_start_matches('/'))
    }

    pub fn read_string(&self, name: &str) -> std::result::Result<Option<String>, ArchiveError> {
        self.archive.read_string(&self.app_entry(name))
    }

    pub fn write_string(&mut self, name: &str, text: &str) -> std::result::Result<(), ArchiveError> {
        let entry = self.app_entry(name);
        self.archive.insert(&entry, text.as_bytes())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let entry = self.app_entry(name);
        self.archive.remove(&entry).is_some()
    }

    /// Rename an application entry, keeping its timestamp.
    pub fn rename(&mut self, from: &str, to: &str) -> std::result::Result<bool, ArchiveError> {
        let source = self.app_entry(from);
        let target = self.app_entry(to);
        match self.archive.remove(&source) {
            Some(entry) => {
                self.archive.insert_entry(&target, entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

type StepFn = Box<dyn Fn(&mut UpgradeContext<'_>) -> anyhow::Result<bool> + Send + Sync>;

#[derive(Default)]
struct FormatGroup {
    package_step: Option<StepFn>,
    application_steps: BTreeMap<Version, StepFn>,
}

/// A step selected for execution, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStep {
    pub key: StepKey,
    /// Version the document carries before this step runs.
    pub from: Version,
}

/// Registry of upgrade steps.
#[derive(Default)]
pub struct UpgradeChain {
    groups: BTreeMap<Version, FormatGroup>,
    application_versions: HashMap<Version, Version>,
}

impl UpgradeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step that upgrades the package format to `to_format`.
    pub fn register_package_step<F>(&mut self, to_format: Version, step: F) -> Result<()>
    where
        F: Fn(&mut UpgradeContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let group = self.groups.entry(to_format).or_default();
        if group.package_step.is_some() {
            return Err(UpgradeError::DuplicatePackageStep(to_format));
        }
        group.package_step = Some(Box::new(step));
        Ok(())
    }

    /// Register a step that upgrades application data to `to_application`,
    /// running after the package step for `format` (if any).
    pub fn register_application_step<F>(
        &mut self,
        format: Version,
        to_application: Version,
        step: F,
    ) -> Result<()>
    where
        F: Fn(&mut UpgradeContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        if let Some(existing_format) = self.application_versions.get(&to_application) {
            return Err(UpgradeError::DuplicateApplicationStep {
                version: to_application,
                existing_format: *existing_format,
            });
        }
        self.application_versions.insert(to_application, format);
        self.groups
            .entry(format)
            .or_default()
            .application_steps
            .insert(to_application, Box::new(step));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups
            .values()
            .map(|g| usize::from(g.package_step.is_some()) + g.application_steps.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Steps that apply to a document at the given versions, in execution order.
    ///
    /// Eligibility is decided against the versions the document was opened
    /// with, so an application step registered under a later format group but
    /// with a lower version than an earlier group's still runs. `from` is the
    /// version left by the previous step of the same kind.
    pub fn pending(&self, package_version: Version, application_version: Version) -> Vec<PendingStep> {
        let mut current_package = package_version;
        let mut current_application = application_version;
        let mut pending = Vec::new();

        for (format, group) in &self.groups {
            if group.package_step.is_some() && *format > package_version {
                pending.push(PendingStep {
                    key: StepKey::Package { to: *format },
                    from: current_package,
                });
                current_package = *format;
            }
            for app_version in group.application_steps.keys() {
                if *app_version > application_version {
                    pending.push(PendingStep {
                        key: StepKey::Application {
                            format: *format,
                            to: *app_version,
                        },
                        from: current_application,
                    });
                    current_application = *app_version;
                }
            }
        }

        pending
    }

    /// Run one pending step against the archive.
    pub fn apply(
        &self,
        pending: &PendingStep,
        archive: &mut Archive,
        application_name: &str,
    ) -> Result<()> {
        let step = match pending.key {
            StepKey::Package { to } => self.groups.get(&to).and_then(|g| g.package_step.as_ref()),
            StepKey::Application { format, to } => self
                .groups
                .get(&format)
                .and_then(|g| g.application_steps.get(&to)),
        };
        // `pending` is only ever built from this chain.
        let Some(step) = step else {
            return Err(UpgradeError::Failed {
                step: pending.key,
                source: anyhow::anyhow!("step is not registered in this chain"),
            });
        };

        let to = match pending.key {
            StepKey::Package { to } | StepKey::Application { to, .. } => to,
        };
        let mut context = UpgradeContext {
            archive,
            application_name,
            from: pending.from,
            to,
        };

        match step(&mut context) {
            Ok(true) => Ok(()),
            Ok(false) => Err(UpgradeError::Declined { step: pending.key }),
            Err(source) => Err(UpgradeError::Failed {
                step: pending.key,
                source,
            }),
        }
    }
}

impl std::fmt::Debug for UpgradeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeChain")
            .field("steps", &self.pending(Version::ZERO, Version::ZERO))
            .finish()
    }
}
