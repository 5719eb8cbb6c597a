use std::sync::Arc;
use tracing::{debug, info};

use super::response::{find_json_object, parse_box_values};
use super::{Detection, DetectionFuture, Detector, Layer};
use crate::geometry::{BoundingBox, ReferenceFrame};
use crate::source::SourceImage;
use crate::vision::{VisionModel, VisionRequest};

pub(crate) const BOX_KEY: &str = "box";

const MAX_TOKENS: u32 = 100;
const TEMPERATURE: f32 = 0.1;

const FALLBACK_PROMPT: &str = r#"This is a picture of a math problem. Find the geometric figure in it (triangle, square, circle, and so on).

Return the region containing the figure as a bounding box in this format:
{"box": [left percent, top percent, right percent, bottom percent]}

Percentages range from 0 to 100. For example, a figure in the right half: {"box": [50, 20, 95, 80]}"#;

/// Coarse last-resort detector: the untouched image in, percentages out.
#[derive(Clone)]
pub struct FallbackDetector {
    model: Arc<dyn VisionModel>,
}

impl FallbackDetector {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }
}

impl Detector for FallbackDetector {
    fn layer(&self) -> Layer {
        Layer::Fallback
    }

    fn detect<'a>(&'a self, source: &'a SourceImage) -> DetectionFuture<'a> {
        Box::pin(async move {
            let request = VisionRequest {
                image_data_uri: source.data_uri(),
                prompt: FALLBACK_PROMPT.to_string(),
                max_tokens: MAX_TOKENS,
                temperature: TEMPERATURE,
            };
            let text = self.model.complete(request).await?;
            debug!("fallback response: {}", text.trim());
            let detection = parse_fallback_response(&text);
            if detection == Detection::NotFound {
                info!("fallback model reported no usable figure box");
            }
            Ok(detection)
        })
    }
}

pub(crate) fn parse_fallback_response(text: &str) -> Detection {
    let Some(object) = find_json_object(text, BOX_KEY) else {
        return Detection::NotFound;
    };
    let Some(values) = object.get(BOX_KEY).and_then(|value| parse_box_values(value, true)) else {
        return Detection::NotFound;
    };
    let bbox = BoundingBox::from_array(values).clamp_percent();
    Detection::bounding_box(bbox, ReferenceFrame::Percent)
}
