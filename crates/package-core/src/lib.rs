//! Document persistence in a single versioned archive file.
//!
//! A [`Package`] stores host-application content in a zip container together
//! with format and application versions and a changelog. It coordinates
//! editing sessions through an advisory `.lock` sidecar, tracks unsaved
//! changes through a [`ChangeMonitor`], writes periodic auto-save snapshots,
//! and migrates documents written by older versions through an
//! [`UpgradeChain`] before the content reader ever sees them.

pub mod archive;
mod autosave;
pub mod changelog;
pub mod content;
pub mod events;
pub mod inspect;
pub mod lock;
pub mod monitor;
pub mod options;
pub mod package;
pub mod upgrade;
pub mod version;

pub use archive::{Archive, ArchiveEntry, ArchiveError};
pub use changelog::{ChangelogEntry, ChangelogType};
pub use content::{ContentHandler, PackageReader, PackageWriter};
pub use events::{EventBus, PackageEvent, Subscription};
pub use lock::{LockDescriptor, LockError, PackageLock};
pub use monitor::{ChangeMonitor, Notifier, Observable, ObservableList, ObservableVec, Slot};
pub use options::{ConfigError, PackageOptions, UserIdentity, CURRENT_PACKAGE_VERSION};
pub use package::{OpenError, OpenOutcome, Package, SaveError, SaveOutcome};
pub use upgrade::{UpgradeChain, UpgradeContext, UpgradeError};
pub use version::{Version, VersionError};

pub use tokio_util::sync::CancellationToken;
