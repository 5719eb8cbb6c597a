use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::detectors::{
    CloudParser, Detection, Detector, FallbackDetector, GroundingDetector, Layer,
};
use crate::enhance;
use crate::geometry::{self, BoundingBox, ReferenceFrame};
use crate::settings::Settings;
use crate::source::SourceImage;
use crate::vision::{VisionClient, VisionModel};

/// The cleaned figure handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedImage {
    pub png: Vec<u8>,
    pub layer: Layer,
}

impl CleanedImage {
    pub fn data_uri(&self) -> String {
        enhance::to_data_uri(&self.png)
    }
}

/// Tries each detector in order and returns the first cleaned figure.
pub struct DiagramPipeline {
    detectors: Vec<Box<dyn Detector>>,
}

impl DiagramPipeline {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    /// Builds the standard chain: cloud parser (when configured), then
    /// grounding and fallback (when a vision key is present).
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();

        match CloudParser::from_settings(&settings.cloud_parser) {
            Some(parser) => detectors.push(Box::new(parser)),
            None => debug!("cloud parser not configured; skipping"),
        }

        match VisionClient::from_settings(&settings.vision)? {
            Some(client) => {
                let model: Arc<dyn VisionModel> = Arc::new(client);
                detectors.push(Box::new(GroundingDetector::new(
                    model.clone(),
                    settings.vision.canvas_size,
                )));
                detectors.push(Box::new(FallbackDetector::new(model)));
            }
            None => debug!("vision API key not configured; skipping vision detectors"),
        }

        Ok(Self::new(detectors))
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.detectors.iter().map(|detector| detector.layer()).collect()
    }

    pub async fn detect_and_enhance(&self, image_path: &Path) -> Option<CleanedImage> {
        let source = match SourceImage::load(image_path) {
            Ok(source) => source,
            Err(err) => {
                warn!("diagram detection skipped: {:#}", err);
                return None;
            }
        };
        self.detect_source(&source).await
    }

    pub async fn detect_source(&self, source: &SourceImage) -> Option<CleanedImage> {
        info!(
            "detecting diagram in {} ({}x{})",
            source.file_name(),
            source.width(),
            source.height()
        );
        for detector in &self.detectors {
            let layer = detector.layer();
            info!("[{}] detecting", layer.as_str());
            let detection = match detector.detect(source).await {
                Ok(detection) => detection,
                Err(err) => {
                    warn!("[{}] failed: {:#}", layer.as_str(), err);
                    continue;
                }
            };

            let png = match detection {
                Detection::NotFound => {
                    info!("[{}] no diagram", layer.as_str());
                    continue;
                }
                Detection::Prebuilt { png } => png,
                Detection::BoundingBox { bbox, frame } => {
                    match crop_and_separate(source, &bbox, frame) {
                        Ok(Some(png)) => png,
                        Ok(None) => {
                            info!(
                                "[{}] box {:?} too small after padding",
                                layer.as_str(),
                                bbox
                            );
                            continue;
                        }
                        Err(err) => {
                            warn!("[{}] enhancement failed: {:#}", layer.as_str(), err);
                            continue;
                        }
                    }
                }
            };

            info!("[{}] diagram found", layer.as_str());
            return Some(CleanedImage { png, layer });
        }

        info!("no diagram detected");
        None
    }
}

fn crop_and_separate(
    source: &SourceImage,
    bbox: &BoundingBox,
    frame: ReferenceFrame,
) -> Result<Option<Vec<u8>>> {
    let Some(region) = geometry::normalize(bbox, frame, source.width(), source.height()) else {
        return Ok(None);
    };
    debug!(
        "cropping {}x{} at ({}, {})",
        region.width, region.height, region.left, region.top
    );
    let cropped = enhance::crop(source.image(), region)?;
    enhance::separate(&cropped).map(Some)
}

/// Runs the standard chain for `image_path` and returns the cleaned figure
/// as a `data:image/png;base64,` URI, or `None` when there is no diagram.
pub async fn detect_and_crop_diagram(image_path: &Path, settings: &Settings) -> Option<String> {
    let pipeline = match DiagramPipeline::from_settings(settings) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            warn!("diagram detection unavailable: {:#}", err);
            return None;
        }
    };
    pipeline
        .detect_and_enhance(image_path)
        .await
        .map(|image| image.data_uri())
}
