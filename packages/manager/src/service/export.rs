//! Download-format registry.
//!
//! Output codecs are external collaborators; only the `Exporter` seam and
//! the built-in JSON passthrough live here. CSV/XLSX plug in through the
//! registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::domain::Place;

pub trait Exporter: Send + Sync {
    fn format(&self) -> &'static str;
    fn content_type(&self) -> &'static str;
    /// Render places, optionally restricted to the named top-level columns.
    fn export(&self, places: &[Place], columns: Option<&[String]>) -> Result<Vec<u8>>;
}

pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn export(&self, places: &[Place], columns: Option<&[String]>) -> Result<Vec<u8>> {
        let encode = |e: serde_json::Error| Error::Internal(anyhow::anyhow!("encode export: {e}"));
        let value = match columns {
            None => serde_json::to_value(places).map_err(encode)?,
            Some(columns) => {
                let mut projected = Vec::with_capacity(places.len());
                for place in places {
                    let full = serde_json::to_value(place).map_err(encode)?;
                    let mut out = serde_json::Map::new();
                    if let serde_json::Value::Object(map) = full {
                        for column in columns {
                            if let Some(v) = map.get(column) {
                                out.insert(column.clone(), v.clone());
                            }
                        }
                    }
                    projected.push(serde_json::Value::Object(out));
                }
                serde_json::Value::Array(projected)
            }
        };
        serde_json::to_vec_pretty(&value).map_err(encode)
    }
}

#[derive(Clone, Default)]
pub struct ExporterRegistry {
    exporters: HashMap<&'static str, Arc<dyn Exporter>>,
}

impl ExporterRegistry {
    /// Registry with the built-in JSON exporter.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(JsonExporter));
        registry
    }

    pub fn register(&mut self, exporter: Arc<dyn Exporter>) {
        self.exporters.insert(exporter.format(), exporter);
    }

    pub fn get(&self, format: &str) -> Result<&Arc<dyn Exporter>> {
        self.exporters.get(format).ok_or_else(|| {
            Error::InvalidInput(format!("unsupported download format {format:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(id: &str) -> Place {
        Place {
            place_id: id.to_string(),
            title: format!("Place {id}"),
            phone: "+1 555 0100".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn json_export_round_trips() {
        let exporter = JsonExporter;
        let bytes = exporter.export(&[place("a"), place("b")], None).unwrap();
        let back: Vec<Place> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].place_id, "a");
    }

    #[test]
    fn column_projection_keeps_named_fields_only() {
        let exporter = JsonExporter;
        let columns = vec!["place_id".to_string(), "phone".to_string()];
        let bytes = exporter.export(&[place("a")], Some(&columns)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let object = value[0].as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("place_id"));
        assert!(!object.contains_key("title"));
    }

    #[test]
    fn unknown_format_is_invalid_input() {
        let registry = ExporterRegistry::builtin();
        assert!(registry.get("json").is_ok());
        assert!(matches!(
            registry.get("xlsx"),
            Err(Error::InvalidInput(_))
        ));
    }
}
