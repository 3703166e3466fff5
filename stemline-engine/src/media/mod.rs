//! Media Toolkit Adapter (C1) and Separator Adapter (C2).

pub mod separator;
pub mod toolkit;

pub use separator::Separator;
pub use toolkit::{format_comment, EncodeMode, MediaToolkit, TagSet};
