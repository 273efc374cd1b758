//! Plugin dependency declarations
//!
//! One variant per resolution strategy. Declarations come from the
//! `plugins` list in configuration, either as string notation:
//!
//! - `com.intellij.java` (bundled with the platform)
//! - `org.intellij.scala:2022.1.13` (marketplace)
//! - `org.intellij.scala:2022.1.13@nightly` (marketplace channel)
//!
//! or as a table naming a custom repository or a local path.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{PluginEntry, PluginTable, RepositoryConfig};

/// A declaration that cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid plugin declaration '{declaration}': {reason}")]
pub struct DeclarationError {
    pub declaration: String,
    pub reason: String,
}

impl DeclarationError {
    fn new(declaration: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            declaration: declaration.into(),
            reason: reason.into(),
        }
    }
}

/// A declared plugin dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginDependency {
    /// Shipped inside the platform distribution
    Bundled { id: String },
    /// Published on the JetBrains marketplace; no version means latest
    Marketplace {
        id: String,
        version: Option<String>,
        channel: Option<String>,
    },
    /// Published in a custom repository using the marketplace layout
    CustomRepository {
        id: String,
        version: String,
        repository: String,
    },
    /// A plugin directory or archive on disk
    Local { id: String, path: PathBuf },
}

impl PluginDependency {
    /// Parse string notation.
    pub fn parse(notation: &str) -> Result<Self, DeclarationError> {
        let trimmed = notation.trim();
        let (coordinate, channel) = match trimmed.split_once('@') {
            Some((coordinate, channel)) => (coordinate, Some(channel)),
            None => (trimmed, None),
        };

        let (id, version) = match coordinate.split_once(':') {
            Some((id, version)) => (id, Some(version)),
            None => (coordinate, None),
        };
        validate_id(notation, id)?;

        match (version, channel) {
            (None, None) => Ok(PluginDependency::Bundled { id: id.to_string() }),
            (None, Some(_)) => Err(DeclarationError::new(
                notation,
                "a channel requires a version (id:version@channel)",
            )),
            (Some(""), _) => Err(DeclarationError::new(notation, "empty version")),
            (Some(_), Some("")) => Err(DeclarationError::new(notation, "empty channel")),
            (Some(version), channel) => {
                if version.contains(':') {
                    return Err(DeclarationError::new(notation, "too many ':' separators"));
                }
                Ok(PluginDependency::Marketplace {
                    id: id.to_string(),
                    version: Some(version.to_string()),
                    channel: channel.map(str::to_string),
                })
            }
        }
    }

    /// Interpret a configuration entry, looking up named repositories.
    pub fn from_entry(
        entry: &PluginEntry,
        repositories: &[RepositoryConfig],
    ) -> Result<Self, DeclarationError> {
        match entry {
            PluginEntry::Notation(notation) => Self::parse(notation),
            PluginEntry::Table(table) => Self::from_table(table, repositories),
        }
    }

    fn from_table(
        table: &PluginTable,
        repositories: &[RepositoryConfig],
    ) -> Result<Self, DeclarationError> {
        let label = &table.id;
        validate_id(label, &table.id)?;
        let id = table.id.clone();

        if table.bundled {
            if table.version.is_some() || table.path.is_some() || table.repository.is_some() {
                return Err(DeclarationError::new(
                    label,
                    "a bundled plugin takes no version, path or repository",
                ));
            }
            return Ok(PluginDependency::Bundled { id });
        }

        if let Some(path) = &table.path {
            if table.repository.is_some() || table.channel.is_some() {
                return Err(DeclarationError::new(
                    label,
                    "a local plugin takes no repository or channel",
                ));
            }
            return Ok(PluginDependency::Local {
                id,
                path: path.clone(),
            });
        }

        if let Some(repository) = &table.repository {
            let url = repositories
                .iter()
                .find(|r| &r.name == repository)
                .map(|r| r.url.clone())
                .or_else(|| is_url(repository).then(|| repository.clone()))
                .ok_or_else(|| {
                    DeclarationError::new(label, format!("unknown repository '{}'", repository))
                })?;
            let version = table.version.clone().ok_or_else(|| {
                DeclarationError::new(label, "a custom repository plugin requires a version")
            })?;
            return Ok(PluginDependency::CustomRepository {
                id,
                version,
                repository: url,
            });
        }

        Ok(PluginDependency::Marketplace {
            id,
            version: table.version.clone(),
            channel: table.channel.clone(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            PluginDependency::Bundled { id }
            | PluginDependency::Marketplace { id, .. }
            | PluginDependency::CustomRepository { id, .. }
            | PluginDependency::Local { id, .. } => id,
        }
    }

    /// Explicitly requested version, if any.
    pub fn pinned_version(&self) -> Option<&str> {
        match self {
            PluginDependency::Marketplace { version, .. } => version.as_deref(),
            PluginDependency::CustomRepository { version, .. } => Some(version),
            PluginDependency::Bundled { .. } | PluginDependency::Local { .. } => None,
        }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginDependency::Bundled { id } => write!(f, "{} (bundled)", id),
            PluginDependency::Marketplace {
                id,
                version,
                channel,
            } => {
                write!(f, "{}", id)?;
                if let Some(version) = version {
                    write!(f, ":{}", version)?;
                }
                if let Some(channel) = channel {
                    write!(f, "@{}", channel)?;
                }
                Ok(())
            }
            PluginDependency::CustomRepository {
                id,
                version,
                repository,
            } => write!(f, "{}:{} from {}", id, version, repository),
            PluginDependency::Local { id, path } => write!(f, "{} ({})", id, path.display()),
        }
    }
}

fn validate_id(declaration: &str, id: &str) -> Result<(), DeclarationError> {
    if id.is_empty() {
        return Err(DeclarationError::new(declaration, "empty plugin id"));
    }
    if id.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        return Err(DeclarationError::new(
            declaration,
            "plugin id contains whitespace or path separators",
        ));
    }
    Ok(())
}

fn is_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://") || s.starts_with("file://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: &str) -> PluginTable {
        PluginTable {
            id: id.to_string(),
            version: None,
            channel: None,
            repository: None,
            path: None,
            bundled: false,
        }
    }

    #[test]
    fn test_parse_notations() {
        assert_eq!(
            PluginDependency::parse("com.intellij.java").unwrap(),
            PluginDependency::Bundled {
                id: "com.intellij.java".to_string()
            }
        );
        assert_eq!(
            PluginDependency::parse("org.intellij.scala:2022.1.13").unwrap(),
            PluginDependency::Marketplace {
                id: "org.intellij.scala".to_string(),
                version: Some("2022.1.13".to_string()),
                channel: None
            }
        );
        assert_eq!(
            PluginDependency::parse(" org.intellij.scala:2022.1.13@nightly ").unwrap(),
            PluginDependency::Marketplace {
                id: "org.intellij.scala".to_string(),
                version: Some("2022.1.13".to_string()),
                channel: Some("nightly".to_string())
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", ":1.0", "a:", "a@eap", "a:1.0@", "a:1:2", "my plugin:1.0"] {
            let err = PluginDependency::parse(bad).unwrap_err();
            assert_eq!(err.declaration, bad, "{bad}");
        }
    }

    #[test]
    fn test_table_custom_repository_by_name() {
        let repos = vec![RepositoryConfig {
            name: "corp".to_string(),
            url: "https://plugins.corp.example/maven".to_string(),
        }];
        let mut entry = table("org.corp.tool");
        entry.version = Some("3.1".to_string());
        entry.repository = Some("corp".to_string());

        let dep = PluginDependency::from_entry(&PluginEntry::Table(entry), &repos).unwrap();
        assert_eq!(
            dep,
            PluginDependency::CustomRepository {
                id: "org.corp.tool".to_string(),
                version: "3.1".to_string(),
                repository: "https://plugins.corp.example/maven".to_string()
            }
        );
        assert_eq!(dep.pinned_version(), Some("3.1"));
    }

    #[test]
    fn test_table_unknown_repository() {
        let mut entry = table("org.corp.tool");
        entry.version = Some("3.1".to_string());
        entry.repository = Some("nowhere".to_string());

        let err = PluginDependency::from_entry(&PluginEntry::Table(entry), &[]).unwrap_err();
        assert!(err.to_string().contains("unknown repository 'nowhere'"));
    }

    #[test]
    fn test_table_local_and_bundled() {
        let mut local = table("org.example.local");
        local.path = Some(PathBuf::from("/tmp/plugin"));
        assert!(matches!(
            PluginDependency::from_entry(&PluginEntry::Table(local), &[]).unwrap(),
            PluginDependency::Local { .. }
        ));

        let mut bundled = table("com.intellij.java");
        bundled.bundled = true;
        bundled.version = Some("1".to_string());
        assert!(PluginDependency::from_entry(&PluginEntry::Table(bundled), &[]).is_err());
    }

    #[test]
    fn test_table_without_version_is_latest_marketplace() {
        let dep = PluginDependency::from_entry(&PluginEntry::Table(table("org.rust.lang")), &[])
            .unwrap();
        assert_eq!(dep.pinned_version(), None);
        assert_eq!(dep.to_string(), "org.rust.lang");
    }
}
