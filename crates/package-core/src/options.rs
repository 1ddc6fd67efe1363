use crate::version::Version;
use tracing::Span;

/// Package-format version written by this engine.
pub const CURRENT_PACKAGE_VERSION: Version = Version::new(1, 0, 0);

/// Who is editing: recorded in lock descriptors and changelog entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub username: String,
    pub computer_name: String,
}

impl UserIdentity {
    /// Identity of the current OS user on this machine.
    pub fn current() -> Self {
        Self {
            username: whoami::username(),
            computer_name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// Engine configuration for one `Package`.
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Folder name of the host application inside the archive (`{app}`).
    pub application_name: String,
    /// Version of the host application opening/saving documents.
    pub application_version: Version,
    /// Package-format version this engine reads and writes.
    pub package_version: Version,
    /// Write a `.lock` sidecar for editable sessions.
    pub locking_enabled: bool,
    /// Keep the previous canonical file as `.bak` on save.
    pub backup_enabled: bool,
    /// Snapshot `{app}/...` into `{app}-backup-{version}/...` before upgrading.
    pub preserve_upgrade_backup: bool,
    pub identity: UserIdentity,
    /// Parent span for everything the package logs.
    pub span: Option<Span>,
}

impl PackageOptions {
    pub fn new(application_name: impl Into<String>, application_version: Version) -> Self {
        Self {
            application_name: application_name.into(),
            application_version,
            package_version: CURRENT_PACKAGE_VERSION,
            locking_enabled: true,
            backup_enabled: true,
            preserve_upgrade_backup: true,
            identity: UserIdentity::current(),
            span: None,
        }
    }

    /// Defaults overridden by environment variables.
    ///
    /// Recognised variables (values `true/false/1/0/yes/no/on/off`):
    /// - `PACKAGE_LOCKING`: toggles the `.lock` sidecar
    /// - `PACKAGE_BACKUPS`: toggles the `.bak` copy on save
    /// - `PACKAGE_UPGRADE_BACKUPS`: toggles the pre-upgrade snapshot
    pub fn from_env(
        application_name: impl Into<String>,
        application_version: Version,
    ) -> Result<Self, ConfigError> {
        let mut options = Self::new(application_name, application_version);
        if let Some(value) = env_bool("PACKAGE_LOCKING")? {
            options.locking_enabled = value;
        }
        if let Some(value) = env_bool("PACKAGE_BACKUPS")? {
            options.backup_enabled = value;
        }
        if let Some(value) = env_bool("PACKAGE_UPGRADE_BACKUPS")? {
            options.preserve_upgrade_backup = value;
        }
        Ok(options)
    }

    pub fn with_package_version(mut self, version: Version) -> Self {
        self.package_version = version;
        self
    }

    pub fn with_locking(mut self, enabled: bool) -> Self {
        self.locking_enabled = enabled;
        self
    }

    pub fn with_backups(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    pub fn with_upgrade_backups(mut self, enabled: bool) -> Self {
        self.preserve_upgrade_backup = enabled;
        self
    }

    pub fn with_identity(mut self, identity: UserIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or(ConfigError::InvalidBool { name, value: raw }),
        Err(_) => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a boolean, got '{value}'")]
    InvalidBool { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_defaults() {
        let options = PackageOptions::new("app", Version::new(2, 0, 0));
        assert!(options.locking_enabled);
        assert!(options.backup_enabled);
        assert!(options.preserve_upgrade_backup);
        assert_eq!(options.package_version, CURRENT_PACKAGE_VERSION);
    }

    #[test]
    fn test_builder_overrides() {
        let options = PackageOptions::new("app", Version::new(2, 0, 0))
            .with_locking(false)
            .with_backups(false)
            .with_package_version(Version::new(3, 0, 0));
        assert!(!options.locking_enabled);
        assert!(!options.backup_enabled);
        assert_eq!(options.package_version, Version::new(3, 0, 0));
    }
}
