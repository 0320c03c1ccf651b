//! Source manifest handling
//!
//! Parsing the source document, processing it against the current request,
//! and translating the result into output playlists.

pub mod model;
pub mod parser;
pub mod translator;

pub use model::{MediaSegment, Profile, SourceManifest};
pub use parser::MpdParser;
pub use translator::{build_master, build_media_playlist, RequestContext};
