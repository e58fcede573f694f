//! Pipeline collaborators: discovery, parsing, metadata sources and output

pub mod artifact_writer;
pub mod file_scanner;
pub mod filename_parser;
pub mod metadata_client;
pub mod pipeline;
pub mod sidecar;

pub use artifact_writer::ArtifactWriter;
pub use file_scanner::{is_media_path, FileScanner, ScanError, ScanReport};
pub use filename_parser::{parse_filename, slugify, TitleQuery};
pub use metadata_client::{FetchError, MetadataSource, TmdbClient, TmdbConfig};
pub use pipeline::{cache_key, IngestPipeline};
pub use sidecar::{load_sidecar, sidecar_path, SidecarError};
