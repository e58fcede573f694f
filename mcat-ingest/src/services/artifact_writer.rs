//! Artifact writer: one Markdown file with front matter per slug
//!
//! Writes go to a uniquely named `<output>/<slug>.<uuid>.md.tmp` first and
//! are renamed into place, so readers only ever see complete artifacts and
//! concurrent writers of one slug never share a temp file.

use chrono::Utc;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{MediaMetadata, SourceTag, WorkItem};

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, slug: &str) -> PathBuf {
        self.output_dir.join(format!("{}.md", slug))
    }

    /// Render and atomically write the artifact for `slug`
    pub async fn write(
        &self,
        slug: &str,
        metadata: &MediaMetadata,
        source: SourceTag,
        item: &WorkItem,
    ) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let final_path = self.artifact_path(slug);
        let temp_path = self.output_dir.join(format!("{}.{}.md.tmp", slug, Uuid::new_v4().simple()));

        let body = render(slug, metadata, source, item);
        tokio::fs::write(&temp_path, body).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        tracing::debug!(artifact = %final_path.display(), source = %source, "Artifact written");
        Ok(final_path)
    }
}

/// JSON string literals are valid YAML scalars
fn quoted(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.replace('"', "'")))
}

pub fn render(slug: &str, metadata: &MediaMetadata, source: SourceTag, item: &WorkItem) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "---");
    let _ = writeln!(out, "title: {}", quoted(&metadata.title));
    if let Some(year) = metadata.year {
        let _ = writeln!(out, "year: {}", year);
    }
    let _ = writeln!(out, "slug: {}", slug);
    let _ = writeln!(out, "source: {}", source);
    if let Some(id) = &metadata.provider_id {
        let _ = writeln!(out, "provider_id: {}", quoted(id));
    }
    if let Some(rating) = metadata.rating {
        let _ = writeln!(out, "rating: {:.1}", rating);
    }
    if let Some(runtime) = metadata.runtime_minutes {
        let _ = writeln!(out, "runtime_minutes: {}", runtime);
    }
    if !metadata.genres.is_empty() {
        let genres: Vec<String> = metadata.genres.iter().map(|g| quoted(g)).collect();
        let _ = writeln!(out, "genres: [{}]", genres.join(", "));
    }
    let _ = writeln!(out, "file: {}", quoted(&item.path().to_string_lossy()));
    let _ = writeln!(out, "ingested_at: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out, "---");
    let _ = writeln!(out);

    match metadata.year {
        Some(year) => {
            let _ = writeln!(out, "# {} ({})", metadata.title, year);
        }
        None => {
            let _ = writeln!(out, "# {}", metadata.title);
        }
    }

    if let Some(overview) = &metadata.overview {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", overview.trim());
    }

    out
}
