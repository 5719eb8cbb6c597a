pub mod detectors;
pub mod enhance;
pub mod geometry;
pub mod logging;
mod pipeline;
pub mod settings;
pub mod source;
pub mod vision;

#[cfg(test)]
mod test_util;

pub use detectors::{Detection, Detector, Layer};
pub use pipeline::{CleanedImage, DiagramPipeline, detect_and_crop_diagram};
pub use settings::Settings;
pub use source::SourceImage;
