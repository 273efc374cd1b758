//! Release catalog
//!
//! Resolves symbolic versions (`latest`, `latest-eap`) to concrete ones.
//! - `StaticCatalog`: tables from configuration
//! - `JetbrainsCatalog`: the product-releases service for platforms and
//!   marketplace Maven metadata for plugins

use std::collections::BTreeMap;
use std::sync::Arc;

use ij_cache::{Transport, TransportError};
use roxmltree::Document;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::platform::PlatformType;

/// Alias for the newest stable release
pub const LATEST: &str = "latest";

/// Alias for the newest early-access release
pub const LATEST_EAP: &str = "latest-eap";

/// Catalog lookup errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no entry for {what}")]
    NotFound { what: String },

    #[error("{what} is not available from this catalog")]
    Unsupported { what: String },

    #[error("catalog request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed catalog response from {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Whether `version` is a symbolic alias rather than a concrete version.
pub fn is_alias(version: &str) -> bool {
    let v = version.trim();
    v.eq_ignore_ascii_case(LATEST) || v.eq_ignore_ascii_case(LATEST_EAP)
}

/// Release lookup service.
pub trait ReleaseCatalog: Send + Sync {
    /// Concrete platform version for an alias.
    fn resolve_platform(&self, platform: PlatformType, alias: &str) -> Result<String, CatalogError>;

    /// Latest published version of a marketplace plugin.
    fn latest_plugin_version(
        &self,
        id: &str,
        channel: Option<&str>,
    ) -> Result<String, CatalogError>;
}

/// Catalog backed by configuration tables.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    platforms: BTreeMap<String, BTreeMap<String, String>>,
    plugins: BTreeMap<String, String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            platforms: config.platforms.clone(),
            plugins: config.plugins.clone(),
        }
    }

    pub fn with_platform(mut self, platform: PlatformType, alias: &str, version: &str) -> Self {
        self.platforms
            .entry(platform.code().to_string())
            .or_default()
            .insert(alias.to_ascii_lowercase(), version.to_string());
        self
    }

    pub fn with_plugin(mut self, id: &str, version: &str) -> Self {
        self.plugins.insert(id.to_string(), version.to_string());
        self
    }
}

impl ReleaseCatalog for StaticCatalog {
    fn resolve_platform(&self, platform: PlatformType, alias: &str) -> Result<String, CatalogError> {
        self.platforms
            .get(platform.code())
            .and_then(|aliases| {
                aliases
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(alias))
                    .map(|(_, version)| version.clone())
            })
            .ok_or_else(|| CatalogError::NotFound {
                what: format!("{} {}", platform, alias),
            })
    }

    fn latest_plugin_version(
        &self,
        id: &str,
        channel: Option<&str>,
    ) -> Result<String, CatalogError> {
        let key = match channel {
            Some(channel) => format!("{}@{}", id, channel),
            None => id.to_string(),
        };
        self.plugins
            .get(&key)
            .cloned()
            .ok_or(CatalogError::NotFound { what: key })
    }
}

/// Default product-releases endpoint
pub const PRODUCT_RELEASES_URL: &str = "https://data.services.jetbrains.com/products/releases";

/// Default marketplace Maven repository
pub const MARKETPLACE_MAVEN_URL: &str = "https://plugins.jetbrains.com/maven";

#[derive(Debug, Deserialize)]
struct ProductRelease {
    build: Option<String>,
}

/// Catalog querying JetBrains services.
pub struct JetbrainsCatalog {
    transport: Arc<dyn Transport>,
    releases_url: String,
    marketplace_url: String,
}

impl JetbrainsCatalog {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            releases_url: PRODUCT_RELEASES_URL.to_string(),
            marketplace_url: MARKETPLACE_MAVEN_URL.to_string(),
        }
    }

    /// Point at alternative endpoints (mirrors, tests).
    pub fn with_endpoints(mut self, releases_url: &str, marketplace_url: &str) -> Self {
        self.releases_url = releases_url.trim_end_matches('/').to_string();
        self.marketplace_url = marketplace_url.trim_end_matches('/').to_string();
        self
    }
}

impl ReleaseCatalog for JetbrainsCatalog {
    fn resolve_platform(&self, platform: PlatformType, alias: &str) -> Result<String, CatalogError> {
        let code = platform.release_code().ok_or_else(|| CatalogError::Unsupported {
            what: format!("{} {}", platform, alias),
        })?;
        let release_type = if alias.eq_ignore_ascii_case(LATEST_EAP) {
            "eap"
        } else {
            "release"
        };

        let url = format!(
            "{}?code={}&latest=true&type={}",
            self.releases_url, code, release_type
        );
        debug!(url = %url, "querying product releases");
        let body = self.transport.get_text(&url)?;

        let releases: BTreeMap<String, Vec<ProductRelease>> =
            serde_json::from_str(&body).map_err(|e| CatalogError::Malformed {
                url: url.clone(),
                message: e.to_string(),
            })?;

        releases
            .get(code)
            .and_then(|list| list.iter().find_map(|r| r.build.clone()))
            .ok_or_else(|| CatalogError::NotFound {
                what: format!("{} {}", platform, alias),
            })
    }

    fn latest_plugin_version(
        &self,
        id: &str,
        channel: Option<&str>,
    ) -> Result<String, CatalogError> {
        let group = match channel {
            Some(channel) => format!("{}/com/jetbrains/plugins", channel),
            None => "com/jetbrains/plugins".to_string(),
        };
        let url = format!("{}/{}/{}/maven-metadata.xml", self.marketplace_url, group, id);
        debug!(url = %url, "querying plugin metadata");
        let body = self.transport.get_text(&url)?;

        latest_from_metadata(&body).map_err(|message| CatalogError::Malformed { url, message })
    }
}

/// Read `<versioning><release>` (or `<latest>`) from Maven metadata.
fn latest_from_metadata(xml: &str) -> Result<String, String> {
    let document = Document::parse(xml).map_err(|e| e.to_string())?;
    let versioning = document
        .root_element()
        .children()
        .find(|node| node.has_tag_name("versioning"));
    ["release", "latest"]
        .iter()
        .find_map(|tag| {
            versioning?
                .children()
                .find(|node| node.has_tag_name(*tag))?
                .text()
                .map(str::trim)
                .filter(|version| !version.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| "no <release> or <latest> element".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ij_cache::DownloadInfo;
    use std::io::Write;
    use std::sync::Mutex;

    /// Answers `get_text` from a fixed body and records requested URLs.
    struct TextTransport {
        body: Result<String, u16>,
        requested: Mutex<Vec<String>>,
    }

    impl TextTransport {
        fn ok(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: Ok(body.to_string()),
                requested: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for TextTransport {
        fn download(&self, url: &str, _sink: &mut dyn Write) -> Result<DownloadInfo, TransportError> {
            Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
        }

        fn get_text(&self, url: &str) -> Result<String, TransportError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.body.clone().map_err(|status| TransportError::Status {
                url: url.to_string(),
                status,
            })
        }
    }

    #[test]
    fn test_is_alias() {
        assert!(is_alias("latest"));
        assert!(is_alias("LATEST-EAP"));
        assert!(!is_alias("221.6008.13"));
        assert!(!is_alias("LATEST-EAP-SNAPSHOT"));
    }

    #[test]
    fn test_static_catalog() {
        let catalog = StaticCatalog::new()
            .with_platform(PlatformType::IC, "latest", "221.6008.13")
            .with_plugin("org.rust.lang", "0.4.170")
            .with_plugin("org.rust.lang@nightly", "0.4.171");

        assert_eq!(
            catalog.resolve_platform(PlatformType::IC, "LATEST").unwrap(),
            "221.6008.13"
        );
        assert!(matches!(
            catalog.resolve_platform(PlatformType::IU, "latest"),
            Err(CatalogError::NotFound { .. })
        ));
        assert_eq!(catalog.latest_plugin_version("org.rust.lang", None).unwrap(), "0.4.170");
        assert_eq!(
            catalog.latest_plugin_version("org.rust.lang", Some("nightly")).unwrap(),
            "0.4.171"
        );
    }

    #[test]
    fn test_jetbrains_platform_lookup() {
        let transport = TextTransport::ok(
            r#"{"IIC":[{"date":"2022-06-22","type":"release","version":"2022.1.3","build":"221.6008.13"}]}"#,
        );
        let catalog = JetbrainsCatalog::new(transport.clone())
            .with_endpoints("https://releases.example.com/products/releases", "https://m.example.com");

        let version = catalog.resolve_platform(PlatformType::IC, "latest").unwrap();

        assert_eq!(version, "221.6008.13");
        assert_eq!(
            transport.requested.lock().unwrap()[0],
            "https://releases.example.com/products/releases?code=IIC&latest=true&type=release"
        );
    }

    #[test]
    fn test_jetbrains_eap_and_missing_product() {
        let transport = TextTransport::ok(r#"{"IIU":[]}"#);
        let catalog = JetbrainsCatalog::new(transport.clone());

        assert!(matches!(
            catalog.resolve_platform(PlatformType::IU, "latest-eap"),
            Err(CatalogError::NotFound { .. })
        ));
        assert!(transport.requested.lock().unwrap()[0].ends_with("code=IIU&latest=true&type=eap"));

        assert!(matches!(
            catalog.resolve_platform(PlatformType::AI, "latest"),
            Err(CatalogError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_jetbrains_plugin_metadata() {
        let transport = TextTransport::ok(
            "<metadata><versioning><latest>1.2.0-eap</latest><release>1.1.0</release></versioning></metadata>",
        );
        let catalog = JetbrainsCatalog::new(transport.clone());

        assert_eq!(catalog.latest_plugin_version("org.example", Some("eap")).unwrap(), "1.1.0");
        assert_eq!(
            transport.requested.lock().unwrap()[0],
            "https://plugins.jetbrains.com/maven/eap/com/jetbrains/plugins/org.example/maven-metadata.xml"
        );
    }

    #[test]
    fn test_metadata_parsing() {
        let metadata = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <!-- <release>0.0.1</release> -->
  <groupId>com.jetbrains.plugins</groupId>
  <versioning>
    <latest>
      2.0.0-eap
    </latest>
    <versions><version>1.0.0</version><version>2.0.0-eap</version></versions>
  </versioning>
</metadata>"#;
        assert_eq!(latest_from_metadata(metadata).unwrap(), "2.0.0-eap");
        assert!(latest_from_metadata("<metadata><versioning/></metadata>").is_err());
        assert!(latest_from_metadata("<metadata><release>1.0").is_err());
    }

    #[test]
    fn test_transport_failure_surfaces() {
        let transport = Arc::new(TextTransport {
            body: Err(503),
            requested: Mutex::new(Vec::new()),
        });
        let catalog = JetbrainsCatalog::new(transport);
        assert!(matches!(
            catalog.latest_plugin_version("org.example", None),
            Err(CatalogError::Transport(_))
        ));
    }
}
