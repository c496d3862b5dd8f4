//! Purpose: Load and validate interface configuration from JSON.
//! Exports: `InterfaceConfig`, `LinecardContext`, `CounterDecl`, `NotificationDelivery`.
//! Role: Single source for identifier layout, transport buffering, and counter declarations.
//! Invariants: Linecard indices and hardware descriptors are unique within a config.
//! Invariants: Missing fields take defaults; unknown fields are rejected.
#![allow(clippy::result_large_err)]

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::codec::StatCatalog;
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{ObjectType, StatId, StatValueKind};
use crate::core::vid::LinecardIndexTable;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationDelivery {
    /// Callbacks run on the transport's delivery thread.
    #[default]
    Inline,
    /// Callbacks wait for `RemoteInterface::process_pending_notifications`.
    Queued,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinecardContext {
    pub index: u8,
    #[serde(default)]
    pub hardware_info: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterDecl {
    pub object_type: ObjectType,
    pub id: StatId,
    pub name: String,
    pub kind: StatValueKind,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceConfig {
    pub global_context: u8,
    pub buffered: bool,
    pub linecards: Vec<LinecardContext>,
    pub notification_delivery: NotificationDelivery,
    pub counters: Vec<CounterDecl>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            global_context: 0,
            buffered: false,
            linecards: vec![LinecardContext {
                index: 0,
                hardware_info: String::new(),
            }],
            notification_delivery: NotificationDelivery::Inline,
            counters: Vec::new(),
        }
    }
}

impl InterfaceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read config {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json_str(&text).map_err(|err| {
            let detail = err.message().unwrap_or("invalid config").to_string();
            err.with_message(format!("{}: {detail}", path.display()))
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("failed to parse config json")
                .with_source(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.linecards.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("config must declare at least one linecard"));
        }
        let mut indices = HashSet::new();
        let mut descriptors = HashSet::new();
        for linecard in &self.linecards {
            if !indices.insert(linecard.index) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("duplicate linecard index {}", linecard.index)));
            }
            if !descriptors.insert(linecard.hardware_info.as_str()) {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "duplicate linecard hardware_info {:?}",
                    linecard.hardware_info
                )));
            }
        }
        Ok(())
    }

    pub fn linecard_table(&self) -> LinecardIndexTable {
        let mut table = LinecardIndexTable::new();
        for linecard in &self.linecards {
            table.insert(linecard.hardware_info.clone(), linecard.index);
        }
        table
    }

    /// Built-in counters with the declared ones layered on top.
    pub fn stat_catalog(&self) -> StatCatalog {
        let mut catalog = StatCatalog::builtin();
        for counter in &self.counters {
            catalog.insert(counter.object_type, counter.id, counter.name.clone(), counter.kind);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::{InterfaceConfig, NotificationDelivery};
    use crate::core::codec::StatMetadata;
    use crate::core::error::ErrorKind;
    use crate::core::types::{ObjectType, StatValueKind};

    #[test]
    fn empty_object_takes_defaults() {
        let config = InterfaceConfig::from_json_str("{}").expect("config");
        assert_eq!(config, InterfaceConfig::default());
        assert_eq!(config.linecard_table().index_of(""), Some(0));
    }

    #[test]
    fn parses_full_config() {
        let config = InterfaceConfig::from_json_str(
            r#"{
                "global_context": 1,
                "buffered": true,
                "linecards": [{"index": 2, "hardware_info": "slot-2"}],
                "notification_delivery": "queued",
                "counters": [{"object_type": "OTAI_OBJECT_TYPE_PORT", "id": 40, "name": "OTAI_PORT_STAT_CUSTOM", "kind": "uint64"}]
            }"#,
        )
        .expect("config");
        assert!(config.buffered);
        assert_eq!(config.notification_delivery, NotificationDelivery::Queued);
        assert_eq!(config.linecard_table().index_of("slot-2"), Some(2));
        let catalog = config.stat_catalog();
        let info = catalog.stat_info(ObjectType::Port, 40).expect("counter");
        assert_eq!(info.kind, StatValueKind::Uint64);
    }

    #[test]
    fn rejects_duplicates_and_unknown_fields() {
        let err = InterfaceConfig::from_json_str(
            r#"{"linecards": [{"index": 0}, {"index": 0, "hardware_info": "b"}]}"#,
        )
        .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = InterfaceConfig::from_json_str(
            r#"{"linecards": [{"index": 0, "hardware_info": "a"}, {"index": 1, "hardware_info": "a"}]}"#,
        )
        .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = InterfaceConfig::from_json_str(r#"{"bogus": 1}"#).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = InterfaceConfig::from_json_str(r#"{"linecards": []}"#).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("otai.json");
        std::fs::write(&path, r#"{"global_context": 3}"#).expect("write");
        let config = InterfaceConfig::load(&path).expect("load");
        assert_eq!(config.global_context, 3);

        let err = InterfaceConfig::load(dir.path().join("missing.json")).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
