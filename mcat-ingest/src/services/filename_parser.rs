//! Release filename → title/year query
//!
//! Handles the common scene and library layouts:
//! `The.Matrix.1999.1080p.BluRay.x264.mkv`, `Heat (1995).mkv`,
//! `Alien_1979_Directors_Cut.mp4`, `Inception.mkv`.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tokens that end the title when no year is present
const RELEASE_TAGS: &[&str] = &[
    "480p", "576p", "720p", "1080p", "1080i", "2160p", "4k", "uhd", "bluray", "bdrip", "brrip",
    "webrip", "web-dl", "webdl", "web", "hdtv", "dvdrip", "dvd", "remux", "x264", "x265", "h264",
    "h265", "hevc", "xvid", "hdr", "proper", "repack", "extended", "unrated",
];

/// What a metadata provider is asked about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TitleQuery {
    pub title: String,
    pub year: Option<u16>,
}

impl TitleQuery {
    pub fn slug(&self) -> String {
        slugify(&self.title, self.year)
    }
}

/// Parse a media file name into a query; `None` if no title remains
pub fn parse_filename(path: &Path) -> Option<TitleQuery> {
    let stem = path.file_stem()?.to_string_lossy();

    let normalized: String = stem
        .chars()
        .map(|c| match c {
            '.' | '_' | '(' | ')' | '[' | ']' | '{' | '}' => ' ',
            other => other,
        })
        .collect();

    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| *t != "-")
        .collect();

    // Last year-like token that is not the first token
    let year_index = tokens
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, t)| parse_year(t).is_some())
        .map(|(i, _)| i)
        .last();

    let (title_tokens, year) = match year_index {
        Some(i) => (&tokens[..i], parse_year(tokens[i])),
        None => {
            let end = tokens
                .iter()
                .position(|t| RELEASE_TAGS.contains(&t.to_lowercase().as_str()))
                .unwrap_or(tokens.len());
            (&tokens[..end], None)
        }
    };

    let title = title_tokens.join(" ");
    let title = title.trim_matches(|c: char| c == '-' || c.is_whitespace());
    if title.is_empty() {
        return None;
    }

    Some(TitleQuery {
        title: title.to_string(),
        year,
    })
}

fn parse_year(token: &str) -> Option<u16> {
    if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: u16 = token.parse().ok()?;
    (1888..=2099).contains(&year).then_some(year)
}

/// Output key for a title: lowercase words joined by `-`, year appended
///
/// `slugify("The Matrix", Some(1999)) == "the-matrix-1999"`
pub fn slugify(title: &str, year: Option<u16>) -> String {
    let mut slug = String::with_capacity(title.len() + 5);
    let mut pending_dash = false;

    for c in title.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if let Some(year) = year {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(&year.to_string());
    }

    slug
}
