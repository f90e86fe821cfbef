//! Configuration document, templates, and the store seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument};

use super::error::{GateError, StoreError};

pub const PROPERTY_TEMPLATE: &str = "template";
pub const PROPERTY_CONFIG_IS_EDITABLE: &str = "configIsEditable";

const SETTING_USERNAME_ATTRIBUTE: &str = "ldap.username.attribute";
const SETTING_GUID_ATTRIBUTE: &str = "ldap.guid.attribute";

/// Directory flavours a fresh configuration can be seeded from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Template {
    Default,
    Novell,
    ActiveDirectory,
    OracleDs,
    OpenLdap,
}

impl Template {
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::Novell,
        Self::ActiveDirectory,
        Self::OracleDs,
        Self::OpenLdap,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Novell => "NOVL",
            Self::ActiveDirectory => "AD",
            Self::OracleDs => "ORACLE_DS",
            Self::OpenLdap => "OPEN_LDAP",
        }
    }

    fn username_attribute(self) -> &'static str {
        match self {
            Self::Default | Self::Novell => "cn",
            Self::ActiveDirectory => "sAMAccountName",
            Self::OracleDs | Self::OpenLdap => "uid",
        }
    }

    fn guid_attribute(self) -> &'static str {
        match self {
            Self::Novell => "guid",
            Self::ActiveDirectory => "objectGUID",
            Self::OracleDs => "nsUniqueId",
            Self::Default | Self::OpenLdap => "entryUUID",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Template {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|template| template.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| GateError::ConfigFormat(format!("unknown template: {value}")))
    }
}

/// Well-known properties plus an opaque settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConfiguration {
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    settings: Map<String, Value>,
}

impl StoredConfiguration {
    /// Parse an uploaded or stored document.
    ///
    /// # Errors
    /// Returns `ConfigFormat` when the document is empty or not a configuration.
    pub fn from_document(document: &str) -> Result<Self, GateError> {
        if document.trim().is_empty() {
            return Err(GateError::ConfigFormat("empty document".to_string()));
        }
        serde_json::from_str(document).map_err(|err| GateError::ConfigFormat(err.to_string()))
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties.insert(name.to_string(), value.into());
    }

    #[must_use]
    pub fn setting(&self, name: &str) -> Option<&Value> {
        self.settings.get(name)
    }

    #[must_use]
    pub fn template(&self) -> Option<Template> {
        self.property(PROPERTY_TEMPLATE)
            .and_then(|value| value.parse().ok())
    }

    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.property(PROPERTY_CONFIG_IS_EDITABLE)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }
}

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    async fn load(&self) -> Result<Option<StoredConfiguration>, StoreError>;

    async fn save(&self, configuration: &StoredConfiguration) -> Result<(), StoreError>;

    /// Reload everything that depends on the persisted configuration.
    async fn reinitialize(&self) -> Result<(), StoreError>;

    fn default_configuration(&self, template: Template) -> StoredConfiguration;
}

/// JSON document on local disk.
#[derive(Debug)]
pub struct FileConfigurationStore {
    path: PathBuf,
    generation: AtomicU64,
}

impl FileConfigurationStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of completed reinitializations.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationStore for FileConfigurationStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<StoredConfiguration>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(document) => Ok(Some(serde_json::from_str(&document)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration document present");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, configuration), fields(path = %self.path.display()))]
    async fn save(&self, configuration: &StoredConfiguration) -> Result<(), StoreError> {
        let document = configuration.to_document()?;
        // Write beside the target and rename so readers never see a torn file.
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, document).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        info!("configuration saved");
        Ok(())
    }

    async fn reinitialize(&self) -> Result<(), StoreError> {
        if self.load().await?.is_none() {
            return Err(StoreError::Reinitialize(
                "configuration missing after save".to_string(),
            ));
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "configuration reinitialized");
        Ok(())
    }

    fn default_configuration(&self, template: Template) -> StoredConfiguration {
        let mut configuration = StoredConfiguration::default();
        configuration.set_property(PROPERTY_TEMPLATE, template.as_str());
        configuration.settings.insert(
            SETTING_USERNAME_ATTRIBUTE.to_string(),
            Value::String(template.username_attribute().to_string()),
        );
        configuration.settings.insert(
            SETTING_GUID_ATTRIBUTE.to_string(),
            Value::String(template.guid_attribute().to_string()),
        );
        configuration
    }
}
