// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! The data-source clients manager surface the coordinator consumes.
//!
//! The manager owns the per-class client lists described by the
//! `data_sources` remote configuration. Only the pieces the memory manager
//! acts on are interpreted: the generation number and, per class, which
//! clients have in-memory caching enabled. Everything else in an entry is
//! carried opaquely for the zone loader.

use memmgr_proto::{GenerationId, RrClass};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Rejection of a `data_sources` configuration. The previous configuration
/// stays in force.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("data_sources config is not parseable: {0}")]
    BadFormat(#[from] serde_json::Error),
    #[error("unknown DNS class '{0}' in data_sources config")]
    BadClass(String),
}

/// One configured data source client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataSrcClientConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "cache-enable", default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl DataSrcClientConfig {
    /// Operator-visible name; defaults to the client type.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "_generation_id")]
    generation_id: u64,
    #[serde(default)]
    classes: BTreeMap<String, Vec<DataSrcClientConfig>>,
}

/// Current data-source client lists, by class.
#[derive(Debug, Default)]
pub struct DataSrcClientsMgr {
    generation: Option<GenerationId>,
    classes: BTreeMap<RrClass, Vec<DataSrcClientConfig>>,
}

impl DataSrcClientsMgr {
    /// Swap in a new configuration. On error nothing changes.
    pub fn reconfigure(&mut self, config: &Value) -> Result<(), ConfigError> {
        let raw: RawConfig = serde_json::from_value(config.clone())?;
        let mut classes = BTreeMap::new();
        for (class, clients) in raw.classes {
            let parsed: RrClass = class
                .parse()
                .map_err(|_| ConfigError::BadClass(class.clone()))?;
            classes.insert(parsed, clients);
        }
        debug!(
            "data sources reconfigured to generation {}",
            raw.generation_id
        );
        self.generation = Some(GenerationId(raw.generation_id));
        self.classes = classes;
        Ok(())
    }

    /// Generation of the configuration currently in force.
    pub fn generation(&self) -> Option<GenerationId> {
        self.generation
    }

    /// The (class, name) pairs with in-memory caching enabled; one mapped
    /// segment exists per pair.
    pub fn cached_segments(&self) -> Vec<(RrClass, String)> {
        self.classes
            .iter()
            .flat_map(|(class, clients)| {
                clients
                    .iter()
                    .filter(|client| client.cache_enable)
                    .map(|client| (*class, client.name().to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod t_datasrc_clients {
    use super::*;
    use serde_json::json;

    fn sample_config() -> Value {
        json!({
            "_generation_id": 1,
            "classes": {
                "IN": [
                    {"type": "MasterFiles", "cache-enable": true, "params": {}},
                    {"type": "sqlite3", "cache-enable": false, "params": {}},
                ],
            },
        })
    }

    #[test]
    fn test_reconfigure_parses_generation_and_segments() {
        let mut mgr = DataSrcClientsMgr::default();
        mgr.reconfigure(&sample_config()).unwrap();
        assert_eq!(Some(GenerationId(1)), mgr.generation());
        // only the cache-enabled client gets a segment
        assert_eq!(
            vec![(RrClass::In, "MasterFiles".to_string())],
            mgr.cached_segments()
        );
    }

    #[test]
    fn test_explicit_name_overrides_type() {
        let mut mgr = DataSrcClientsMgr::default();
        mgr.reconfigure(&json!({
            "_generation_id": 42,
            "classes": {
                "IN": [{"type": "sqlite3", "cache-enable": true, "name": "name"}],
            },
        }))
        .unwrap();
        assert_eq!(vec![(RrClass::In, "name".to_string())], mgr.cached_segments());
    }

    #[test]
    fn test_bad_class_keeps_previous_config() {
        let mut mgr = DataSrcClientsMgr::default();
        mgr.reconfigure(&sample_config()).unwrap();

        let err = mgr
            .reconfigure(&json!({
                "_generation_id": 2,
                "classes": {"badclass": []},
            }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadClass(_)));
        assert_eq!(Some(GenerationId(1)), mgr.generation());
        assert_eq!(1, mgr.cached_segments().len());
    }

    #[test]
    fn test_unparseable_config_is_rejected() {
        let mut mgr = DataSrcClientsMgr::default();
        assert!(matches!(
            mgr.reconfigure(&json!({"classes": {}})),
            Err(ConfigError::BadFormat(_))
        ));
        assert!(matches!(
            mgr.reconfigure(&json!("nonsense")),
            Err(ConfigError::BadFormat(_))
        ));
        assert_eq!(None, mgr.generation());
    }

    #[test]
    fn test_multiple_classes() {
        let mut mgr = DataSrcClientsMgr::default();
        mgr.reconfigure(&json!({
            "_generation_id": 3,
            "classes": {
                "IN": [{"type": "MasterFiles", "cache-enable": true}],
                "CH": [{"type": "static", "cache-enable": true}],
            },
        }))
        .unwrap();
        assert_eq!(
            vec![
                (RrClass::In, "MasterFiles".to_string()),
                (RrClass::Ch, "static".to_string()),
            ],
            mgr.cached_segments()
        );
    }
}
