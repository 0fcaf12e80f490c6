use crate::anonymize::{Masker, MaskingMethod};
use crate::error::ConfigError;
use crate::snapshots::SourceKind;
use crate::timefmt::parse_timestamp;
use crate::traces::TraceKind;
use crate::writer::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_PATH_ENV: &str = "COMPACTOR_CONFIG";
pub const SALT_ENV: &str = "COMPACTOR_MASKING_SALT";
pub const DEFAULT_CONFIG_PATH: &str = "compactor.yaml";
pub const DEFAULT_EPOCH: &str = "2015-09-06T23:31:16";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CompactorConfig {
    /// Instant every `*_SEC` field is computed from.
    pub epoch: String,
    pub masking: MaskingConfig,
    pub backup: BackupConfig,
    pub workers: WorkersConfig,
    pub source: SourceConfig,
    pub instances: InstancesConfig,
    pub traces: TracesConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MaskingConfig {
    pub method: MaskingMethod,
    pub salt: Option<String>,
    /// Accept a per-run random salt when none is supplied.
    pub generate_salt: bool,
    /// Overrides the method's default truncation.
    pub truncate: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub file_regex: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkersConfig {
    pub files_per_worker: usize,
    pub max_workers: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub nova_compute_binary: String,
    pub hypervisor_hostname_regex: Option<String>,
    pub rack_extract_group: Option<usize>,
    /// Capability names read from bare-metal snapshots; empty reads them all.
    pub baremetal_properties: Vec<String>,
    /// Property rank-masked in machine traces. Unset picks the source kind's
    /// default, an empty string disables it.
    pub ordinal_mask_field: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InstancesConfig {
    pub database: PathBuf,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TraceFields {
    pub masked_fields: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TracesConfig {
    pub machine: TraceFields,
    pub instance: TraceFields,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            epoch: DEFAULT_EPOCH.to_string(),
            masking: MaskingConfig::default(),
            backup: BackupConfig::default(),
            workers: WorkersConfig::default(),
            source: SourceConfig::default(),
            instances: InstancesConfig::default(),
            traces: TracesConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            method: MaskingMethod::Sha2Salted,
            salt: None,
            generate_salt: false,
            truncate: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./backups"),
            file_regex: r".*\.(sqlite|sqlite3|db)$".to_string(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            files_per_worker: 4,
            max_workers: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Vm,
            nova_compute_binary: "nova-compute".to_string(),
            hypervisor_hostname_regex: None,
            rack_extract_group: None,
            baremetal_properties: vec![
                "node_type".to_string(),
                "cpu_arch".to_string(),
                "placement.rack".to_string(),
            ],
            ordinal_mask_field: None,
        }
    }
}

impl Default for InstancesConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./nova.sqlite"),
            start: None,
            end: None,
        }
    }
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            machine: TraceFields {
                masked_fields: TraceKind::Machine
                    .default_masked_fields()
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
            },
            instance: TraceFields {
                masked_fields: TraceKind::Instance
                    .default_masked_fields()
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
            },
        }
    }
}

impl CompactorConfig {
    pub fn epoch(&self) -> Result<OffsetDateTime, ConfigError> {
        parse_timestamp(&self.epoch).ok_or_else(|| ConfigError::InvalidEpoch(self.epoch.clone()))
    }

    pub fn trace_fields(&self, kind: TraceKind) -> &TraceFields {
        match kind {
            TraceKind::Machine => &self.traces.machine,
            TraceKind::Instance => &self.traces.instance,
        }
    }
}

impl MaskingConfig {
    pub fn truncate(&self) -> Option<usize> {
        self.truncate.or_else(|| self.method.default_truncate())
    }

    /// Builds the run's masker. Every hashing method needs a salt; a missing
    /// one is fatal unless a generated salt was explicitly allowed.
    pub fn build_masker(&self) -> Result<Masker, ConfigError> {
        let digest = self.method.digest();
        if !self.method.is_salted() {
            return Ok(Masker::new(digest, Vec::new(), self.truncate));
        }
        match self.salt.as_deref() {
            Some(salt) if !salt.is_empty() => Ok(Masker::new(digest, salt.as_bytes().to_vec(), self.truncate())),
            _ if self.generate_salt => {
                warn!("[config] using a generated salt: masked values can not be correlated with other trace files");
                Ok(Masker::with_generated_salt(digest, self.truncate()))
            }
            _ => Err(ConfigError::MissingSalt(self.method.to_string())),
        }
    }
}

impl WorkersConfig {
    /// One worker per `files_per_worker` snapshots, capped by `max_workers`.
    pub fn pool_size(&self, snapshots: usize) -> usize {
        let per_worker = self.files_per_worker.max(1);
        let mut size = snapshots.div_ceil(per_worker);
        if let Some(max) = self.max_workers {
            size = size.min(max);
        }
        size.max(1)
    }
}

impl SourceConfig {
    pub fn ordinal_field(&self) -> Option<&str> {
        match self.ordinal_mask_field.as_deref() {
            Some("") => None,
            Some(field) => Some(field),
            None => self.kind.default_ordinal_field(),
        }
    }
}

impl InstancesConfig {
    pub fn window(&self) -> Result<(Option<OffsetDateTime>, Option<OffsetDateTime>), ConfigError> {
        let bound = |value: &Option<String>| -> Result<Option<OffsetDateTime>, ConfigError> {
            match value.as_deref() {
                None => Ok(None),
                Some(text) => parse_timestamp(text)
                    .map(Some)
                    .ok_or_else(|| ConfigError::InvalidWindow(text.to_string())),
            }
        };
        Ok((bound(&self.start)?, bound(&self.end)?))
    }
}

/// Resolves the config path: explicit argument, then `COMPACTOR_CONFIG`,
/// then `compactor.yaml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
    }
}

/// Loads the YAML config. A missing file yields defaults; an unreadable or
/// invalid one is an error. The salt falls back to `COMPACTOR_MASKING_SALT`.
pub async fn load_config(explicit: Option<&Path>) -> Result<CompactorConfig, ConfigError> {
    let path = config_path(explicit);
    let mut config = if path.exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        if txt.trim().is_empty() {
            CompactorConfig::default()
        } else {
            parse_config(&txt).map_err(|source| ConfigError::Parse { path: path.clone(), source })?
        }
    } else {
        info!("[config] no {}, using default config", path.display());
        CompactorConfig::default()
    };

    if config.masking.salt.is_none() {
        if let Ok(salt) = std::env::var(SALT_ENV) {
            config.masking.salt = Some(salt);
        }
    }
    Ok(config)
}

pub fn parse_config(txt: &str) -> Result<CompactorConfig, serde_yaml::Error> {
    serde_yaml::from_str(txt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymize::DigestMethod;
    use time::macros::datetime;

    #[test]
    fn test_default_config() {
        let config = CompactorConfig::default();
        assert_eq!(config.epoch().unwrap(), datetime!(2015-09-06 23:31:16 UTC));
        assert_eq!(config.masking.method, MaskingMethod::Sha2Salted);
        assert_eq!(config.source.kind, SourceKind::Vm);
        assert_eq!(config.source.ordinal_field(), Some("rack"));
        assert_eq!(config.traces.machine.masked_fields, vec!["HOST_NAME (PHYSICAL)"]);
        assert_eq!(config.traces.instance.masked_fields.len(), 4);
    }

    #[test]
    fn test_parse_yaml() {
        let config = parse_config(
            r#"
epoch: "2016-01-01 00:00:00"
masking:
  method: sha1-raw
backup:
  dir: /srv/backups
  file_regex: 'nova-.*\.sqlite$'
workers:
  files_per_worker: 2
  max_workers: 3
source:
  kind: baremetal
  baremetal_properties: [node_type]
output:
  format: jsons
"#,
        )
        .unwrap();
        assert_eq!(config.masking.method, MaskingMethod::Sha1Raw);
        assert_eq!(config.backup.dir, PathBuf::from("/srv/backups"));
        assert_eq!(config.workers.pool_size(10), 3);
        assert_eq!(config.source.kind, SourceKind::Baremetal);
        assert_eq!(config.source.ordinal_field(), None);
        assert_eq!(config.output.format, OutputFormat::Jsons);
        // untouched sections keep their defaults
        assert_eq!(config.source.nova_compute_binary, "nova-compute");
        assert_eq!(config.traces.machine.masked_fields, vec!["HOST_NAME (PHYSICAL)"]);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(parse_config("masking:\n  method: rot13\n").is_err());
    }

    #[test]
    fn test_missing_salt_is_fatal() {
        let masking = MaskingConfig::default();
        assert!(matches!(masking.build_masker(), Err(ConfigError::MissingSalt(_))));

        let empty = MaskingConfig {
            salt: Some(String::new()),
            ..MaskingConfig::default()
        };
        assert!(matches!(empty.build_masker(), Err(ConfigError::MissingSalt(_))));

        let legacy = MaskingConfig {
            method: MaskingMethod::Sha1Raw,
            ..MaskingConfig::default()
        };
        assert!(matches!(legacy.build_masker(), Err(ConfigError::MissingSalt(m)) if m == "sha1-raw"));

        let debug = MaskingConfig {
            method: MaskingMethod::None,
            ..MaskingConfig::default()
        };
        assert_eq!(debug.build_masker().unwrap().mask("c01-04"), "c01-04");
    }

    #[test]
    fn test_legacy_method_uses_supplied_salt() {
        let legacy = MaskingConfig {
            method: MaskingMethod::Sha1Raw,
            salt: Some("pepper".into()),
            ..MaskingConfig::default()
        };
        let masker = legacy.build_masker().unwrap();
        assert_eq!(masker.method(), DigestMethod::Sha1);
        assert_eq!(masker.mask("h"), Masker::new(DigestMethod::Sha1, b"pepper".to_vec(), None).mask("h"));
        assert_eq!(masker.mask("h").len(), 40);
    }

    #[test]
    fn test_salt_sources() {
        let explicit = MaskingConfig {
            salt: Some("pepper".into()),
            ..MaskingConfig::default()
        };
        let masker = explicit.build_masker().unwrap();
        assert_eq!(masker.method(), DigestMethod::Sha256);
        assert_eq!(masker.mask("h").len(), 32);

        let generated = MaskingConfig {
            generate_salt: true,
            ..MaskingConfig::default()
        };
        assert!(generated.build_masker().is_ok());

        let debug = MaskingConfig {
            method: MaskingMethod::None,
            ..MaskingConfig::default()
        };
        assert_eq!(debug.build_masker().unwrap().mask("c01-04"), "c01-04");
    }

    #[test]
    fn test_pool_size() {
        let workers = WorkersConfig::default();
        assert_eq!(workers.pool_size(0), 1);
        assert_eq!(workers.pool_size(4), 1);
        assert_eq!(workers.pool_size(9), 3);
        let zero = WorkersConfig {
            files_per_worker: 0,
            max_workers: Some(2),
        };
        assert_eq!(zero.pool_size(9), 2);
    }

    #[test]
    fn test_ordinal_field_override() {
        let mut source = SourceConfig::default();
        source.ordinal_mask_field = Some(String::new());
        assert_eq!(source.ordinal_field(), None);
        source.ordinal_mask_field = Some("placement.rack".into());
        assert_eq!(source.ordinal_field(), Some("placement.rack"));
    }

    #[test]
    fn test_instance_window() {
        let instances = InstancesConfig {
            start: Some("2016-01-01".into()),
            end: Some("not a date".into()),
            ..InstancesConfig::default()
        };
        assert!(matches!(instances.window(), Err(ConfigError::InvalidWindow(_))));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.yaml"))).await.unwrap();
        assert_eq!(config.epoch, DEFAULT_EPOCH);
    }

    #[tokio::test]
    async fn test_load_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compactor.yaml");
        std::fs::write(&path, "workers: [oops").unwrap();
        assert!(matches!(
            load_config(Some(&path)).await,
            Err(ConfigError::Parse { .. })
        ));
    }
}
