//! Content transformation between Nostr and Hive.

pub mod compose;
pub mod marker;
pub mod markup;

pub use compose::{
    generate_title, longform_permlink, platform_metadata, snap_permlink, source_hash, summarize,
    ComposedNote, ContentTransform, FALLBACK_TITLE,
};
pub use marker::{opt_out_keyword, LoopMarker, MarkerSet, MarkerSubject, SOURCE_TAG};
pub use markup::{clean_content, plain_text, strip_markdown};
