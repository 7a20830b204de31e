pub mod annotator;
pub mod codec;
pub mod geometry;
pub mod screenshot;
pub mod traits;
pub mod types;
