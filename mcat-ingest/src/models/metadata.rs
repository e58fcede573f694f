//! Enrichment payload for one media item

use serde::{Deserialize, Serialize};

/// Metadata record written into the cache and rendered into the artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMetadata {
    pub title: String,
    pub year: Option<u16>,
    pub overview: Option<String>,
    pub genres: Vec<String>,
    pub runtime_minutes: Option<u32>,
    /// Average rating on a 0-10 scale
    pub rating: Option<f32>,
    /// Identifier at the remote provider
    pub provider_id: Option<String>,
}

impl MediaMetadata {
    /// Fill fields missing from `self` with values from `other`
    ///
    /// Values already present in `self` always win.
    pub fn merge_from(mut self, other: &MediaMetadata) -> Self {
        if self.title.trim().is_empty() {
            self.title = other.title.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.overview.as_deref().map_or(true, |o| o.trim().is_empty()) {
            self.overview = other.overview.clone();
        }
        if self.genres.is_empty() {
            self.genres = other.genres.clone();
        }
        if self.runtime_minutes.is_none() {
            self.runtime_minutes = other.runtime_minutes;
        }
        if self.rating.is_none() {
            self.rating = other.rating;
        }
        if self.provider_id.is_none() {
            self.provider_id = other.provider_id.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_primary_values() {
        let primary = MediaMetadata {
            title: "The Matrix".to_string(),
            year: Some(1999),
            overview: None,
            genres: vec![],
            runtime_minutes: Some(136),
            rating: Some(8.2),
            provider_id: Some("603".to_string()),
        };
        let sidecar = MediaMetadata {
            title: "Matrix".to_string(),
            year: Some(1998),
            overview: Some("A hacker learns the truth.".to_string()),
            genres: vec!["Action".to_string()],
            runtime_minutes: Some(1),
            rating: None,
            provider_id: None,
        };

        let merged = primary.merge_from(&sidecar);
        assert_eq!(merged.title, "The Matrix");
        assert_eq!(merged.year, Some(1999));
        assert_eq!(merged.runtime_minutes, Some(136));
        assert_eq!(merged.overview.as_deref(), Some("A hacker learns the truth."));
        assert_eq!(merged.genres, vec!["Action".to_string()]);
    }

    #[test]
    fn test_partial_json_deserializes() {
        let meta: MediaMetadata = serde_json::from_str(r#"{"title":"Heat"}"#).unwrap();
        assert_eq!(meta.title, "Heat");
        assert!(meta.genres.is_empty());
    }
}
