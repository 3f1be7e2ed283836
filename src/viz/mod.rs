//! Live visualization.

pub mod rerun;

pub use self::rerun::RerunViewer;
