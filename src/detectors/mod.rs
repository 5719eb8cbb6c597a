use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

use crate::geometry::{BoundingBox, ReferenceFrame};
use crate::source::SourceImage;

mod cloud_parser;
mod fallback;
mod grounding;
mod response;

pub use cloud_parser::{CloudParser, CloudParserConfig, JobState, first_archive_image};
pub use fallback::FallbackDetector;
pub use grounding::GroundingDetector;
pub use response::{find_json_object, parse_box_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    CloudParser,
    Grounding,
    Fallback,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::CloudParser => "cloud-parser",
            Layer::Grounding => "grounding",
            Layer::Fallback => "fallback",
        }
    }
}

/// What a single detector invocation found.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    NotFound,
    BoundingBox {
        bbox: BoundingBox,
        frame: ReferenceFrame,
    },
    /// An already isolated figure, PNG encoded.
    Prebuilt { png: Vec<u8> },
}

impl Detection {
    /// Degenerate boxes collapse to [`Detection::NotFound`].
    pub fn bounding_box(bbox: BoundingBox, frame: ReferenceFrame) -> Self {
        if bbox.is_valid() {
            Detection::BoundingBox { bbox, frame }
        } else {
            Detection::NotFound
        }
    }
}

pub type DetectionFuture<'a> = Pin<Box<dyn Future<Output = Result<Detection>> + Send + 'a>>;

pub trait Detector: Send + Sync {
    fn layer(&self) -> Layer;
    fn detect<'a>(&'a self, source: &'a SourceImage) -> DetectionFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_box_is_not_found() {
        let bbox = BoundingBox::new(10.0, 10.0, 10.0, 20.0);
        assert_eq!(
            Detection::bounding_box(bbox, ReferenceFrame::Percent),
            Detection::NotFound
        );
    }

    #[test]
    fn valid_box_keeps_its_frame() {
        let bbox = BoundingBox::new(10.0, 10.0, 40.0, 20.0);
        let frame = ReferenceFrame::Pixels {
            width: 1000,
            height: 1000,
        };
        assert_eq!(
            Detection::bounding_box(bbox, frame),
            Detection::BoundingBox { bbox, frame }
        );
    }
}
