use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;

use crate::browser::Browser;

const MAX_NAME_COLLISIONS: usize = 10;

fn file_name(stamp: &str, postfix: &str, collisions: usize) -> String {
    format!(
        "{}__{}__{stamp}{}__{postfix}.png",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        "_".repeat(collisions)
    )
}

/// Save a screenshot of `page` into `outputs_dir` and return its path.
///
/// Names look like `gatekeep__0.1.0__2024-05-01_08-30-00__page_load_timeout.png`.
/// An existing file is never overwritten.
///
/// # Errors
///
/// Returns an error if the screenshot cannot be taken or written.
pub async fn save(page: &dyn Browser, outputs_dir: &Path, postfix: &str) -> Result<PathBuf> {
    let png = page.screenshot().await?;

    tokio::fs::create_dir_all(outputs_dir)
        .await
        .with_context(|| format!("failed to create {}", outputs_dir.display()))?;

    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    for collisions in 0..MAX_NAME_COLLISIONS {
        let path = outputs_dir.join(file_name(&stamp, postfix, collisions));
        if tokio::fs::try_exists(&path).await? {
            continue;
        }

        tokio::fs::write(&path, &png)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        return Ok(path);
    }

    Err(anyhow!(
        "too many screenshots named {} in {}",
        file_name(&stamp, postfix, 0),
        outputs_dir.display()
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FakeBrowser, Scene};

    #[test]
    fn names_include_version_and_postfix() {
        let name = file_name("2024-05-01_08-30-00", "page_load_timeout", 0);
        assert_eq!(
            name,
            format!(
                "gatekeep__{}__2024-05-01_08-30-00__page_load_timeout.png",
                env!("CARGO_PKG_VERSION")
            )
        );
        assert!(file_name("2024-05-01_08-30-00", "x", 2).contains("08-30-00__"));
        assert!(file_name("2024-05-01_08-30-00", "x", 2).contains("00___x"));
    }

    #[tokio::test]
    async fn saves_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakeBrowser::new(Scene::new(""));

        let first = save(&page, dir.path(), "browser").await.unwrap();
        let second = save(&page, dir.path(), "browser").await.unwrap();

        assert!(first.exists());
        assert!(second.exists());
        assert_eq!(std::fs::read(&first).unwrap(), b"\x89PNG");
        assert_eq!(page.screenshots(), 2);
        // same second or the next one, never the same file
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn creates_outputs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("outputs").join("screens");
        let page = FakeBrowser::new(Scene::new(""));

        let path = save(&page, &nested, "browser").await.unwrap();

        assert!(path.starts_with(&nested));
    }
}
