use anyhow::{anyhow, Result};
use colored::Colorize;
use std::collections::HashSet;
use tracing::debug;

use crate::labels;
use crate::podman::{short_id, Container, Engine, Image};
use crate::runtime::Runtime;

// ======================================================
// LIST COMMAND
// ======================================================

pub async fn run(
    engine: &Engine,
    runtime: &Runtime,
    restricted: bool,
    only_containers: bool,
    only_images: bool,
) -> Result<()> {
    let mut ls_containers = true;
    let mut ls_images = true;

    if !only_containers && only_images {
        ls_containers = false;
    } else if only_containers && !only_images {
        ls_images = false;
    }

    let images = if ls_images {
        fetch_images(engine, runtime, restricted, false).await?
    } else {
        Vec::new()
    };

    let containers = if ls_containers {
        fetch_containers(engine, runtime, restricted).await?
    } else {
        Vec::new()
    };

    let highlight_running = if containers.is_empty() {
        false
    } else {
        engine.version_at_least("2.0.0").await
    };

    render(&images, &containers, highlight_running);
    Ok(())
}

/// Managed containers, in listing order.
async fn fetch_containers(
    engine: &Engine,
    runtime: &Runtime,
    restricted: bool,
) -> Result<Vec<Container>> {
    debug!("Fetching all containers");

    let all = if restricted {
        runtime.containers().await
    } else {
        engine.containers().await
    }
    .map_err(|e| {
        debug!("Fetching all containers failed: {}", e);
        anyhow!("failed to get containers")
    })?;

    Ok(process_containers(all))
}

/// Managed images, deduplicated by identifier, flattened to one name per
/// record and sorted by name.
async fn fetch_images(
    engine: &Engine,
    runtime: &Runtime,
    restricted: bool,
    fill_name_with_id: bool,
) -> Result<Vec<Image>> {
    debug!("Fetching all images");

    let all = if restricted {
        runtime.images().await
    } else {
        engine.images().await
    }
    .map_err(|e| {
        debug!("Fetching all images failed: {}", e);
        anyhow!("failed to get images")
    })?;

    Ok(process_images(all, fill_name_with_id))
}

// ======================================================
// FILTERING
// ======================================================

fn process_containers(all: Vec<Container>) -> Vec<Container> {
    all.into_iter()
        .filter(|container| labels::is_managed(&container.labels))
        .collect()
}

/// Duplicate identifiers keep their first occurrence only.
fn process_images(all: Vec<Image>, fill_name_with_id: bool) -> Vec<Image> {
    let mut seen = HashSet::new();
    let mut managed = Vec::new();

    for image in all {
        if !seen.insert(image.id.clone()) {
            continue;
        }

        if labels::is_managed(&image.labels) {
            managed.extend(image.flatten_names(fill_name_with_id));
        }
    }

    managed.sort_by(|a, b| a.names[0].cmp(&b.names[0]));
    managed
}

// ======================================================
// OUTPUT
// ======================================================

const RUNNING: &str = "running";

/// Print the image and container tables. Every image record must carry
/// exactly one name by this point.
pub fn render(images: &[Image], containers: &[Container], highlight_running: bool) {
    let image_lines = image_table(images);
    let container_lines = container_table(containers);

    for line in &image_lines {
        println!("{}", line);
    }

    if !image_lines.is_empty() && !container_lines.is_empty() {
        println!();
    }

    for (i, line) in container_lines.iter().enumerate() {
        let running = i > 0 && highlight_running && containers[i - 1].status == RUNNING;

        if running {
            println!("{}", line.as_str().bold().green());
        } else {
            println!("{}", line);
        }
    }
}

/// Aligned image table lines, header first. Empty when there are no images.
fn image_table(images: &[Image]) -> Vec<String> {
    if images.is_empty() {
        return Vec::new();
    }

    let mut rows = vec![vec![
        "IMAGE ID".to_string(),
        "IMAGE NAME".to_string(),
        "SIZE".to_string(),
    ]];

    for image in images {
        assert!(image.names.len() == 1, "cannot list an unflattened image");

        rows.push(vec![
            short_id(&image.id),
            image.names[0].clone(),
            image.size.clone(),
        ]);
    }

    layout(&rows)
}

/// Aligned container table lines, header first. Empty when there are no
/// containers.
fn container_table(containers: &[Container]) -> Vec<String> {
    if containers.is_empty() {
        return Vec::new();
    }

    let mut rows = vec![vec![
        "CONTAINER NAME".to_string(),
        "STATUS".to_string(),
        "IMAGE NAME".to_string(),
    ]];

    for container in containers {
        rows.push(vec![
            container.names.first().cloned().unwrap_or_default(),
            container.status.clone(),
            container.image.clone(),
        ]);
    }

    layout(&rows)
}

/// Pad every column to its widest cell plus a two-space gutter. The last
/// column is left unpadded. Styling is applied to whole padded lines by
/// the caller, so it never disturbs the alignment.
fn layout(rows: &[Vec<String>]) -> Vec<String> {
    let columns = rows[0].len();

    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    rows.iter()
        .map(|row| {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i + 1 == columns {
                    line.push_str(cell);
                } else {
                    line.push_str(&format!("{:<width$}", cell, width = widths[i] + 2));
                }
            }
            line
        })
        .collect()
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn image(id: &str, names: &[&str], managed: bool) -> Image {
        Image {
            id: id.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            size: "354 MB".to_string(),
            labels: if managed {
                labels::marker_labels()
            } else {
                HashMap::new()
            },
        }
    }

    fn container(name: &str, status: &str, managed: bool) -> Container {
        Container {
            id: format!("{name}-id"),
            names: vec![name.to_string()],
            status: status.to_string(),
            image: "registry.fedoraproject.org/hutch:36".to_string(),
            labels: if managed {
                labels::marker_labels()
            } else {
                HashMap::new()
            },
        }
    }

    #[test]
    fn unmarked_records_are_filtered_out() {
        let containers = process_containers(vec![
            container("devbox", "running", true),
            container("postgres", "running", false),
        ]);

        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].names, vec!["devbox".to_string()]);

        let images = process_images(vec![image("aa", &["plain"], false)], false);
        assert!(images.is_empty());
    }

    #[test]
    fn images_are_sorted_by_name() {
        let images = process_images(
            vec![
                image("aa", &["b"], true),
                image("bb", &["a"], true),
                image("cc", &["c"], true),
            ],
            false,
        );

        let names: Vec<&str> = images.iter().map(|i| i.names[0].as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_image_ids_keep_the_first_entry() {
        let images = process_images(
            vec![image("aa", &["first"], true), image("aa", &["second"], true)],
            false,
        );

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].names, vec!["first".to_string()]);
    }

    #[test]
    fn nameless_images_get_a_placeholder_or_the_short_id() {
        let placeholder = process_images(vec![image("deadbeefcafe42", &[], true)], false);
        assert_eq!(placeholder[0].names, vec!["<none>".to_string()]);

        let filled = process_images(vec![image("deadbeefcafe42", &[], true)], true);
        assert_eq!(filled[0].names, vec!["deadbeefcafe".to_string()]);
    }

    #[test]
    fn two_names_of_one_image_render_as_two_sorted_rows() {
        let images = process_images(vec![image("deadbeef", &["b", "a"], true)], false);
        let image_lines = image_table(&images);
        let container_lines = container_table(&[]);

        assert_eq!(
            image_lines,
            vec![
                "IMAGE ID  IMAGE NAME  SIZE".to_string(),
                "deadbeef  a           354 MB".to_string(),
                "deadbeef  b           354 MB".to_string(),
            ]
        );
        assert!(container_lines.is_empty());
    }

    #[test]
    fn columns_widen_to_fit_content() {
        let lines = container_table(&[container(
            "a-rather-long-container-name",
            "Exited (0) 2 hours ago",
            true,
        )]);

        assert_eq!(
            lines,
            vec![
                "CONTAINER NAME                STATUS                  IMAGE NAME".to_string(),
                "a-rather-long-container-name  Exited (0) 2 hours ago  registry.fedoraproject.org/hutch:36".to_string(),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "unflattened")]
    fn an_unflattened_image_cannot_be_rendered() {
        image_table(&[image("aa", &["a", "b"], true)]);
    }
}
