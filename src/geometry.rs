/// Fraction of the detected width/height added on each side before cropping.
pub const PADDING_RATIO: f64 = 0.15;
/// Crops narrower or shorter than this (after padding and clamping) are rejected.
pub const MIN_CROP_SIZE: u32 = 50;

const PERCENT_MAX: f64 = 100.0;

/// A rectangle as reported by a detector: `(left, top, right, bottom)`.
///
/// The numbers carry no unit on their own; the [`ReferenceFrame`] travelling
/// with the box says how to read them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        let [left, top, right, bottom] = values;
        Self::new(left, top, right, bottom)
    }

    pub fn is_valid(&self) -> bool {
        let finite = [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|value| value.is_finite());
        finite && self.right > self.left && self.bottom > self.top
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn clamp_percent(self) -> Self {
        let clamp = |value: f64| {
            if value.is_nan() {
                0.0
            } else {
                value.clamp(0.0, PERCENT_MAX)
            }
        };
        Self::new(
            clamp(self.left),
            clamp(self.top),
            clamp(self.right),
            clamp(self.bottom),
        )
    }
}

/// Coordinate space a [`BoundingBox`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFrame {
    /// Percentages (0..=100) of the original image width/height.
    Percent,
    /// Pixels of a raster that may differ in size from the original image.
    Pixels { width: u32, height: u32 },
}

/// Pixel rectangle inside the original image, ready for cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl AbsoluteBox {
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }
}

/// Maps `bbox` from `frame` onto the original image, rounded to whole pixels.
pub fn to_image_pixels(
    bbox: &BoundingBox,
    frame: ReferenceFrame,
    original_width: u32,
    original_height: u32,
) -> Option<BoundingBox> {
    let (ref_width, ref_height) = match frame {
        ReferenceFrame::Percent => (PERCENT_MAX, PERCENT_MAX),
        ReferenceFrame::Pixels { width, height } => {
            if width == 0 || height == 0 {
                return None;
            }
            (width as f64, height as f64)
        }
    };
    let width = original_width as f64;
    let height = original_height as f64;
    let scale_x = |value: f64| (value * width / ref_width).round();
    let scale_y = |value: f64| (value * height / ref_height).round();
    Some(BoundingBox::new(
        scale_x(bbox.left),
        scale_y(bbox.top),
        scale_x(bbox.right),
        scale_y(bbox.bottom),
    ))
}

/// Converts a detector box into padded, clamped pixel coordinates of the
/// original image. Returns `None` for degenerate boxes and for crops smaller
/// than [`MIN_CROP_SIZE`] on either axis.
pub fn normalize(
    bbox: &BoundingBox,
    frame: ReferenceFrame,
    original_width: u32,
    original_height: u32,
) -> Option<AbsoluteBox> {
    if !bbox.is_valid() || original_width == 0 || original_height == 0 {
        return None;
    }
    let pixels = to_image_pixels(bbox, frame, original_width, original_height)?;
    if !pixels.is_valid() {
        return None;
    }

    let pad_x = (pixels.width() * PADDING_RATIO).round();
    let pad_y = (pixels.height() * PADDING_RATIO).round();
    let max_x = original_width as f64;
    let max_y = original_height as f64;

    let left = (pixels.left - pad_x).clamp(0.0, max_x);
    let top = (pixels.top - pad_y).clamp(0.0, max_y);
    let right = (pixels.right + pad_x).clamp(0.0, max_x);
    let bottom = (pixels.bottom + pad_y).clamp(0.0, max_y);

    let width = right - left;
    let height = bottom - top;
    let min = MIN_CROP_SIZE as f64;
    if width < min || height < min {
        return None;
    }

    Some(AbsoluteBox {
        left: left as u32,
        top: top as u32,
        width: width as u32,
        height: height as u32,
    })
}
