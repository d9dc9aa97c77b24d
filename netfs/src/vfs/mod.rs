//! Name space operations over inode numbers: path resolution and links.
pub mod path;

pub use path::PathResolver;
