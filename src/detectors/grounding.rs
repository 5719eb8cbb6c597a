use anyhow::{Context, Result};
use image::imageops::FilterType;
use std::sync::Arc;
use tracing::{debug, info};

use super::response::{find_json_object, parse_box_values};
use super::{Detection, DetectionFuture, Detector, Layer};
use crate::enhance::{encode_png, to_data_uri};
use crate::geometry::{BoundingBox, ReferenceFrame};
use crate::source::SourceImage;
use crate::vision::{VisionModel, VisionRequest};

pub(crate) const BOX_KEY: &str = "bbox_2d";

const MAX_TOKENS: u32 = 150;
const TEMPERATURE: f32 = 0.05;

const GROUNDING_PROMPT: &str = r#"This is a photo or scan of a printed math problem. Locate the illustration, schematic, or geometric figure in it.

Rules:
1. The target is the figure that accompanies the problem (geometry drawing, function graph, physics setup, and similar).
2. Detect the figure precisely even when it is small or embedded in the text.
3. Strictly exclude tables, plain text blocks, and formula blocks. If the image only contains a table, return null.
4. Box the figure itself only. Do not include problem numbers, answer options, or captions.
5. Keep the box tight around the figure edges.

Output format (strict JSON):
{"bbox_2d": [x1, y1, x2, y2]}

x1,y1 is the top-left pixel coordinate and x2,y2 the bottom-right pixel coordinate.
If there is no figure, return: {"bbox_2d": null}"#;

/// Asks the vision model for a pixel box on a fixed square canvas, then
/// hands the box back tagged with that canvas as its reference frame.
#[derive(Clone)]
pub struct GroundingDetector {
    model: Arc<dyn VisionModel>,
    canvas_size: u32,
}

impl GroundingDetector {
    pub fn new(model: Arc<dyn VisionModel>, canvas_size: u32) -> Self {
        Self {
            model,
            canvas_size: canvas_size.max(1),
        }
    }

    fn render_canvas(&self, source: &SourceImage) -> Result<Vec<u8>> {
        let resized =
            source
                .image()
                .resize_exact(self.canvas_size, self.canvas_size, FilterType::Triangle);
        encode_png(&resized).with_context(|| "failed to encode grounding canvas")
    }
}

impl Detector for GroundingDetector {
    fn layer(&self) -> Layer {
        Layer::Grounding
    }

    fn detect<'a>(&'a self, source: &'a SourceImage) -> DetectionFuture<'a> {
        Box::pin(async move {
            let canvas = self.render_canvas(source)?;
            let request = VisionRequest {
                image_data_uri: to_data_uri(&canvas),
                prompt: GROUNDING_PROMPT.to_string(),
                max_tokens: MAX_TOKENS,
                temperature: TEMPERATURE,
            };
            let text = self.model.complete(request).await?;
            debug!("grounding response: {}", text.trim());
            let detection = parse_grounding_response(&text, self.canvas_size);
            if detection == Detection::NotFound {
                info!("grounding model reported no usable figure box");
            }
            Ok(detection)
        })
    }
}

pub(crate) fn parse_grounding_response(text: &str, canvas_size: u32) -> Detection {
    let Some(object) = find_json_object(text, BOX_KEY) else {
        return Detection::NotFound;
    };
    let Some(values) = object.get(BOX_KEY).and_then(|value| parse_box_values(value, false))
    else {
        return Detection::NotFound;
    };
    let frame = ReferenceFrame::Pixels {
        width: canvas_size,
        height: canvas_size,
    };
    Detection::bounding_box(BoundingBox::from_array(values), frame)
}
