use std::collections::HashMap;

use image::{DynamicImage, RgbImage, imageops};
use ndarray::Array4;

use crate::error::TransformError;

/// The ImageNet channel means, in RGB order.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// The ImageNet channel standard deviations, in RGB order.
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The interpolation used by a resize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Bilinear,
}

impl From<Filter> for imageops::FilterType {
    fn from(value: Filter) -> Self {
        match value {
            Filter::Nearest => imageops::FilterType::Nearest,
            Filter::Bilinear => imageops::FilterType::Triangle,
        }
    }
}

/// Resizes to a `size` by `size` square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub size: u32,
    pub filter: Filter,
}

impl Resize {
    pub fn new(size: u32, filter: Filter) -> Self {
        Self { size, filter }
    }
}

/// A deterministic image to tensor pipeline: resizes, then scaling to `[0, 1]` and
/// per-channel normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransform {
    steps: Vec<Resize>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageTransform {
    /// Creates a new `ImageTransform` normalizing with the ImageNet statistics.
    pub fn new(steps: impl IntoIterator<Item = Resize>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            mean: MEAN,
            std: STD,
        }
    }

    /// 224x224 bilinear, what most ImageNet backbones expect.
    pub fn standard() -> Self {
        Self::new([Resize::new(224, Filter::Bilinear)])
    }

    /// Squashes the image to 32x32 and blows it back up to 224x224 with nearest neighbour,
    /// giving the blocky low resolution look the CIFAR students were trained on.
    pub fn low_res_upscale() -> Self {
        Self::new([
            Resize::new(32, Filter::Bilinear),
            Resize::new(224, Filter::Nearest),
        ])
    }

    /// 260x260 bilinear, the native resolution of EfficientNet-B2.
    pub fn efficientnet_b2() -> Self {
        Self::new([Resize::new(260, Filter::Bilinear)])
    }

    pub fn steps(&self) -> &[Resize] {
        &self.steps
    }

    /// Turns `image` into a `[1, 3, h, w]` tensor.
    pub fn apply(&self, image: &DynamicImage) -> Result<Array4<f32>, TransformError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(TransformError::EmptyImage { width, height });
        }

        let rgb = self.steps.iter().fold(image.to_rgb8(), |rgb, step| {
            imageops::resize(&rgb, step.size, step.size, step.filter.into())
        });

        Ok(self.to_tensor(&rgb))
    }

    fn to_tensor(&self, rgb: &RgbImage) -> Array4<f32> {
        let (w, h) = rgb.dimensions();

        Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
            let value = rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - self.mean[c]) / self.std[c]
        })
    }
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self::standard()
    }
}

/// Maps model names to the transform each one expects.
#[derive(Debug, Clone, Default)]
pub struct PreprocessSelector {
    transforms: HashMap<String, ImageTransform>,
    fallback: ImageTransform,
}

impl PreprocessSelector {
    /// Creates a new `PreprocessSelector` that uses `fallback` for every model.
    pub fn new(fallback: ImageTransform) -> Self {
        Self {
            transforms: HashMap::new(),
            fallback,
        }
    }

    /// The pipelines the deployed models were trained with.
    pub fn deployed() -> Self {
        Self::default()
            .with("baseline", ImageTransform::low_res_upscale())
            .with("distilled", ImageTransform::low_res_upscale())
            .with("large_b2", ImageTransform::efficientnet_b2())
    }

    pub fn with(mut self, name: impl Into<String>, transform: ImageTransform) -> Self {
        self.transforms.insert(name.into(), transform);
        self
    }

    /// The transform of `name`, unknown names get the fallback.
    pub fn select(&self, name: &str) -> &ImageTransform {
        self.transforms.get(name).unwrap_or(&self.fallback)
    }
}
