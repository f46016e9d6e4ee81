use std::collections::HashMap;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{EngineError, RecordKind};
use crate::labels;
use crate::podman::{Container, Image};

const DEFAULT_NAMESPACE: &str = "hutch";

// ======================================================
// TEXT TABLES
// ======================================================

/// Column-aligned text output from the low-level runtime, e.g.
///
/// ```text
/// CONTAINER    IMAGE                              RUNTIME
/// devbox       docker.io/library/fedora:latest    io.containerd.runc.v2
/// ```
///
/// Cells are sliced by the byte offset of each header label, so a value may
/// contain spaces as long as it stays within its column.
struct TextTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    fn parse(
        table: &'static str,
        raw: &str,
        required: &[&'static str],
    ) -> Result<TextTable, EngineError> {
        let mut lines = raw.lines();

        let header = match lines.next() {
            Some(line) if !line.trim().is_empty() => line,
            _ => {
                return Err(EngineError::MissingColumn {
                    table,
                    column: required[0],
                })
            }
        };

        let mut starts = Vec::new();
        let mut prev_space = true;
        for (idx, ch) in header.char_indices() {
            if !ch.is_whitespace() && prev_space {
                starts.push(idx);
            }
            prev_space = ch.is_whitespace();
        }

        let columns: Vec<String> = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(header.len());
                header[start..end].trim().to_string()
            })
            .collect();

        for &column in required {
            if !columns.iter().any(|c| c == column) {
                return Err(EngineError::MissingColumn { table, column });
            }
        }

        let rows = lines
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                starts
                    .iter()
                    .enumerate()
                    .map(|(i, &start)| {
                        let end = starts
                            .get(i + 1)
                            .copied()
                            .unwrap_or(usize::MAX)
                            .min(line.len());

                        line.get(start.min(line.len())..end)
                            .unwrap_or("")
                            .trim()
                            .to_string()
                    })
                    .collect()
            })
            .collect();

        Ok(TextTable { columns, rows })
    }

    fn cell(&self, row: usize, column: &str) -> &str {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.rows.get(row)?.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

// ======================================================
// PARSING
// ======================================================

/// Join the container listing with the task listing on the first column.
/// A container with no task entry reports "Created".
fn join_containers(
    container_listing: &str,
    task_listing: &str,
) -> Result<Vec<Container>, EngineError> {
    let containers = TextTable::parse("container", container_listing, &["CONTAINER", "IMAGE"])?;
    let tasks = TextTable::parse("task", task_listing, &["TASK", "STATUS"])?;

    let mut statuses: HashMap<String, String> = HashMap::new();
    for i in 0..tasks.len() {
        statuses.insert(
            tasks.cell(i, "TASK").to_string(),
            tasks.cell(i, "STATUS").to_string(),
        );
    }

    let mut result = Vec::new();
    for i in 0..containers.len() {
        let id = containers.cell(i, "CONTAINER");
        if id.is_empty() {
            error!("Skipping malformed container row: {:?}", containers.rows[i]);
            continue;
        }

        let status = statuses
            .get(id)
            .cloned()
            .unwrap_or_else(|| "Created".to_string());

        result.push(Container {
            id: id.to_string(),
            names: vec![id.to_string()],
            status,
            image: containers.cell(i, "IMAGE").to_string(),
            labels: labels::marker_labels(),
        });
    }

    Ok(result)
}

fn parse_images(listing: &str) -> Result<Vec<Image>, EngineError> {
    let table = TextTable::parse("image", listing, &["REF", "DIGEST", "SIZE"])?;

    let mut images = Vec::new();
    for i in 0..table.len() {
        let reference = table.cell(i, "REF");
        let digest = table.cell(i, "DIGEST");
        if reference.is_empty() || digest.is_empty() {
            error!("Skipping malformed image row: {:?}", table.rows[i]);
            continue;
        }

        images.push(Image {
            id: digest.to_string(),
            names: vec![reference.to_string()],
            size: table.cell(i, "SIZE").to_string(),
            labels: labels::marker_labels(),
        });
    }

    Ok(images)
}

// ======================================================
// RUNTIME
// ======================================================

/// Handle on the low-level runtime binary, used in restricted mode where
/// the engine proper is unavailable. All records live in a dedicated
/// namespace.
pub struct Runtime {
    binary: String,
    namespace: String,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_binary("ctr", DEFAULT_NAMESPACE)
    }

    pub fn with_binary(binary: &str, namespace: &str) -> Self {
        Self {
            binary: binary.to_string(),
            namespace: namespace.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, EngineError> {
        debug!("Running {} -n {} {}", self.binary, self.namespace, args.join(" "));

        Command::new(&self.binary)
            .arg("-n")
            .arg(&self.namespace)
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::Launch {
                binary: self.binary.clone(),
                source: e,
            })
    }

    async fn exec(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = self.run(args).await?;

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

    /// Containers in the runtime namespace, with status joined in from the
    /// task listing.
    pub async fn containers(&self) -> Result<Vec<Container>, EngineError> {
        let container_listing = self.exec(&["containers", "ls"]).await?;
        let task_listing = self.exec(&["task", "ls"]).await?;
        join_containers(&container_listing, &task_listing)
    }

    /// Images in the runtime namespace, one record per reference.
    pub async fn images(&self) -> Result<Vec<Image>, EngineError> {
        let listing = self.exec(&["images", "ls"]).await?;
        parse_images(&listing)
    }

    /// Whether the named container exists in the runtime namespace.
    pub async fn container_exists(&self, container: &str) -> Result<bool, EngineError> {
        let listing = self.exec(&["containers", "ls"]).await?;
        let table = TextTable::parse("container", &listing, &["CONTAINER"])?;
        Ok((0..table.len()).any(|i| table.cell(i, "CONTAINER") == container))
    }

    /// Whether the named image exists in the runtime namespace.
    pub async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let listing = self.exec(&["images", "ls"]).await?;
        let table = TextTable::parse("image", &listing, &["REF"])?;
        Ok((0..table.len()).any(|i| table.cell(i, "REF") == image))
    }

    /// Pull an image into the runtime namespace.
    pub async fn pull(&self, image: &str) -> Result<(), EngineError> {
        debug!("Pulling image {}", image);
        self.exec(&["image", "pull", image]).await?;
        Ok(())
    }

    /// Remove a container. Exit code 1 means the container is missing or
    /// still has a running task.
    pub async fn remove_container(&self, container: &str) -> Result<(), EngineError> {
        debug!("Removing container {}", container);
        let output = self.run(&["container", "rm", container]).await?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(EngineError::ContainerBusy {
                name: container.to_string(),
            }),
            _ => Err(EngineError::RemoveFailed {
                kind: RecordKind::Container,
                name: container.to_string(),
            }),
        }
    }

    /// Remove an image. Exit code 1 means the image is missing, 2 that
    /// other records still depend on it.
    pub async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        debug!("Removing image {}", image);
        let output = self.run(&["image", "rm", image]).await?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(EngineError::NotFound {
                kind: RecordKind::Image,
                name: image.to_string(),
            }),
            Some(2) => Err(EngineError::ImageInUse {
                name: image.to_string(),
            }),
            _ => Err(EngineError::RemoveFailed {
                kind: RecordKind::Image,
                name: image.to_string(),
            }),
        }
    }
}

// ======================================================
// TESTS
// ======================================================
