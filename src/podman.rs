use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::error::{EngineError, RecordKind};
use crate::labels;

// ======================================================
// RECORDS
// ======================================================

/// A container as reported by the engine's listing subcommand.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Container {
    #[serde(rename = "ID", alias = "Id", default)]
    pub id: String,

    /// Older engine releases report `Names` as a single string; newer ones
    /// report an array. Anything else decodes to no names.
    #[serde(rename = "Names", default, deserialize_with = "string_or_seq")]
    pub names: Vec<String>,

    #[serde(rename = "Status", default)]
    pub status: String,

    #[serde(rename = "Image", default)]
    pub image: String,

    #[serde(rename = "Labels", default, deserialize_with = "null_default")]
    pub labels: HashMap<String, String>,
}

/// An image as reported by the engine's listing subcommand. The raw listing
/// may repeat an identifier and may carry no names at all for dangling
/// images; both are resolved downstream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Image {
    #[serde(rename = "ID", alias = "Id", default)]
    pub id: String,

    #[serde(rename = "Names", default, deserialize_with = "null_default")]
    pub names: Vec<String>,

    #[serde(rename = "Size", default)]
    pub size: String,

    #[serde(rename = "Labels", default, deserialize_with = "null_default")]
    pub labels: HashMap<String, String>,
}

impl Image {
    /// Expand into one record per name, all sharing the identifier, size and
    /// labels. A record with no names yields a single record named either
    /// the short identifier or the `<none>` placeholder.
    pub fn flatten_names(&self, fill_name_with_id: bool) -> Vec<Image> {
        if self.names.is_empty() {
            let name = if fill_name_with_id {
                short_id(&self.id)
            } else {
                "<none>".to_string()
            };

            let mut flattened = self.clone();
            flattened.names = vec![name];
            return vec![flattened];
        }

        self.names
            .iter()
            .map(|name| {
                let mut flattened = self.clone();
                flattened.names = vec![name.clone()];
                flattened
            })
            .collect()
    }
}

/// 12-character short form of a record identifier.
pub fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(12).collect()
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    Ok(match value {
        Value::String(name) => vec![name],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ======================================================
// ENGINE
// ======================================================

/// Handle on the container engine binary.
///
/// The engine's self-reported version is cached after the first successful
/// read and reused for the rest of the process; a failed read leaves the
/// cache empty so a later call may retry.
pub struct Engine {
    binary: String,
    log_level: String,
    version: OnceCell<String>,
}

impl Engine {
    pub fn new(log_level: &str) -> Self {
        Self::with_binary("podman", log_level)
    }

    pub fn with_binary(binary: &str, log_level: &str) -> Self {
        Self {
            binary: binary.to_string(),
            log_level: log_level.to_string(),
            version: OnceCell::new(),
        }
    }

    async fn exec(&self, args: &[&str]) -> Result<String, EngineError> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::Launch {
                binary: self.binary.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{} failed: {}", self.binary, stderr.trim());
            return Err(EngineError::CommandFailed {
                binary: self.binary.clone(),
                status: output.status.code().unwrap_or(-1),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn decode_error(&self, source: serde_json::Error) -> EngineError {
        EngineError::Decode {
            binary: self.binary.clone(),
            source,
        }
    }

    /// Containers known to the engine, in listing order. Entries that fail
    /// to decode are logged and dropped; the rest are still returned.
    pub async fn containers(&self) -> Result<Vec<Container>, EngineError> {
        let stdout = self
            .exec(&["--log-level", &self.log_level, "ps", "--all", "--format", "json"])
            .await?;

        let entries: Vec<Value> =
            serde_json::from_str(&stdout).map_err(|e| self.decode_error(e))?;

        let mut containers = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<Container>(entry) {
                Ok(container) => containers.push(container),
                Err(e) => error!("Failed to decode container entry: {}", e),
            }
        }

        Ok(containers)
    }

    /// Images known to the engine. No deduplication or flattening happens
    /// here.
    pub async fn images(&self) -> Result<Vec<Image>, EngineError> {
        let stdout = self
            .exec(&["--log-level", &self.log_level, "images", "--format", "json"])
            .await?;

        serde_json::from_str(&stdout).map_err(|e| self.decode_error(e))
    }

    /// Version string reported by `version --format json`. Newer engines
    /// nest it under a client block; older ones report it at the top level.
    pub async fn version(&self) -> Result<&str, EngineError> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let stdout = self
                    .exec(&["--log-level", &self.log_level, "version", "--format", "json"])
                    .await?;

                let parsed: Value =
                    serde_json::from_str(&stdout).map_err(|e| self.decode_error(e))?;

                let version = parsed
                    .get("Client")
                    .and_then(|client| client.get("Version"))
                    .or_else(|| parsed.get("Version"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                Ok::<_, EngineError>(version)
            })
            .await?;

        Ok(version)
    }

    /// True when the engine's version is at least `required`. A version
    /// that cannot be read compares as the empty string, so this degrades
    /// to false instead of failing.
    pub async fn version_at_least(&self, required: &str) -> bool {
        let current = match self.version().await {
            Ok(version) => version.to_string(),
            Err(e) => {
                debug!("Engine version unavailable: {}", e);
                String::new()
            }
        };

        compare_versions(&current, required) != Ordering::Less
    }

    /// Raw `inspect` data for a single container or image.
    pub async fn inspect(&self, kind: RecordKind, target: &str) -> Result<Value, EngineError> {
        let stdout = self
            .exec(&[
                "--log-level",
                &self.log_level,
                "inspect",
                "--format",
                "json",
                "--type",
                kind.as_str(),
                target,
            ])
            .await?;

        let mut entries: Vec<Value> =
            serde_json::from_str(&stdout).map_err(|e| self.decode_error(e))?;

        if entries.is_empty() {
            return Err(EngineError::NotFound {
                kind,
                name: target.to_string(),
            });
        }

        Ok(entries.remove(0))
    }

    /// Whether the named container carries a hutch marker label.
    pub async fn is_managed_container(&self, container: &str) -> Result<bool, EngineError> {
        let info = self.inspect(RecordKind::Container, container).await?;
        let container_labels = info.pointer("/Config/Labels").cloned().unwrap_or(Value::Null);
        Ok(labels_value_is_managed(container_labels))
    }

    /// Whether the named image carries a hutch marker label.
    pub async fn is_managed_image(&self, image: &str) -> Result<bool, EngineError> {
        let info = self.inspect(RecordKind::Image, image).await?;
        let image_labels = info.get("Labels").cloned().unwrap_or(Value::Null);
        Ok(labels_value_is_managed(image_labels))
    }

    /// Start an existing container, streaming the engine's stderr through.
    pub async fn start(&self, container: &str) -> Result<(), EngineError> {
        debug!("Starting container {}", container);

        let status = Command::new(&self.binary)
            .args(["--log-level", self.log_level.as_str(), "start", container])
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| EngineError::Launch {
                binary: self.binary.clone(),
                source: e,
            })?;

        if !status.success() {
            return Err(EngineError::CommandFailed {
                binary: self.binary.clone(),
                status: status.code().unwrap_or(-1),
            });
        }

        Ok(())
    }
}

fn labels_value_is_managed(value: Value) -> bool {
    serde_json::from_value::<HashMap<String, String>>(value)
        .map(|map| labels::is_managed(&map))
        .unwrap_or(false)
}

// ======================================================
// VERSION COMPARISON
// ======================================================

/// Compare two version strings by numeric component. A leading `v` and any
/// pre-release or build suffix ("2.5.1-dev") are ignored; missing
/// components count as zero, so "2.0" equals "2.0.0".
fn compare_versions(current: &str, required: &str) -> Ordering {
    let current = normalize(current);
    let required = normalize(required);

    for i in 0..current.len().max(required.len()) {
        let a = current.get(i).copied().unwrap_or(0);
        let b = required.get(i).copied().unwrap_or(0);

        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

fn normalize(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or("")
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .take_while(Option::is_some)
        .flatten()
        .collect()
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn container_names_decode_from_a_single_string() {
        let container: Container = serde_json::from_value(json!({
            "ID": "8d2a4fd4d9d4",
            "Names": "devbox",
            "Status": "running",
            "Image": "registry.fedoraproject.org/hutch:36",
            "Labels": {"com.github.hutch.hutch": "true"}
        }))
        .unwrap();

        assert_eq!(container.names, vec!["devbox".to_string()]);
        assert_eq!(container.status, "running");
        assert_eq!(container.image, "registry.fedoraproject.org/hutch:36");
    }

    #[test]
    fn container_names_decode_from_an_array_in_order() {
        let container: Container = serde_json::from_value(json!({
            "Id": "8d2a4fd4d9d4",
            "Names": ["devbox", "devbox-alias"],
            "Status": "Created",
            "Image": "registry.fedoraproject.org/hutch:36",
            "Labels": {"io.hutch.managed": "true"}
        }))
        .unwrap();

        assert_eq!(
            container.names,
            vec!["devbox".to_string(), "devbox-alias".to_string()]
        );
    }

    #[test]
    fn unexpected_names_shape_decodes_to_no_names() {
        for names in [json!(7), json!({"first": "devbox"}), json!(null)] {
            let container: Container = serde_json::from_value(json!({
                "ID": "8d2a4fd4d9d4",
                "Names": names,
                "Status": "Created",
                "Image": "registry.fedoraproject.org/hutch:36",
                "Labels": {}
            }))
            .unwrap();

            assert_eq!(container.names, Vec::<String>::new());
        }
    }

    #[test]
    fn null_labels_decode_to_an_empty_map() {
        let container: Container = serde_json::from_value(json!({
            "ID": "8d2a4fd4d9d4",
            "Names": ["devbox"],
            "Status": "running",
            "Image": "registry.fedoraproject.org/hutch:36",
            "Labels": null
        }))
        .unwrap();

        assert!(container.labels.is_empty());

        let image: Image = serde_json::from_value(json!({
            "ID": "b7d4b8f1f2a3",
            "Names": null,
            "Size": "354 MB",
            "Labels": null
        }))
        .unwrap();

        assert!(image.names.is_empty());
        assert!(image.labels.is_empty());
    }

    #[test]
    fn flattening_no_names_uses_the_placeholder() {
        let image = Image {
            id: "b7d4b8f1f2a3c5d6".to_string(),
            names: Vec::new(),
            size: "354 MB".to_string(),
            labels: HashMap::new(),
        };

        let flattened = image.flatten_names(false);
        assert_eq!(flattened.len(), 1);
        assert_eq!(flattened[0].names, vec!["<none>".to_string()]);
    }

    #[test]
    fn flattening_no_names_can_fill_with_the_short_id() {
        let image = Image {
            id: "b7d4b8f1f2a3c5d6".to_string(),
            names: Vec::new(),
            size: "354 MB".to_string(),
            labels: HashMap::new(),
        };

        let flattened = image.flatten_names(true);
        assert_eq!(flattened.len(), 1);
        assert_eq!(flattened[0].names, vec!["b7d4b8f1f2a3".to_string()]);
    }

    #[test]
    fn flattening_many_names_shares_id_and_labels() {
        let image = Image {
            id: "b7d4b8f1f2a3".to_string(),
            names: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            size: "354 MB".to_string(),
            labels: crate::labels::marker_labels(),
        };

        let flattened = image.flatten_names(false);
        assert_eq!(flattened.len(), 3);

        for (flat, name) in flattened.iter().zip(["a", "b", "c"]) {
            assert_eq!(flat.names, vec![name.to_string()]);
            assert_eq!(flat.id, image.id);
            assert_eq!(flat.labels, image.labels);
            assert_eq!(flat.size, image.size);
        }
    }

    #[test]
    fn short_id_strips_the_digest_prefix() {
        assert_eq!(
            short_id("sha256:b7d4b8f1f2a3c5d6e7f8a9b0c1d2e3f4"),
            "b7d4b8f1f2a3"
        );
        assert_eq!(short_id("b7d4"), "b7d4");
    }

    #[test]
    fn version_comparison_is_numeric() {
        assert_eq!(compare_versions("2.0.1", "2.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.9.9", "2.0.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v2.1.0-dev", "2.1.0"), Ordering::Equal);
        assert_eq!(compare_versions("10.0.0", "9.9.9"), Ordering::Greater);
    }

    #[test]
    fn unreadable_version_compares_as_empty() {
        assert_eq!(compare_versions("", "2.0.0"), Ordering::Less);
        assert_eq!(compare_versions("", ""), Ordering::Equal);
    }

    #[tokio::test]
    async fn version_check_degrades_to_false_without_an_engine() {
        let engine = Engine::with_binary("hutch-test-missing-binary", "error");
        assert!(!engine.version_at_least("2.0.0").await);
    }
}
