use crate::{Dims, Error};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use std::path::Path;

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the session
    Image(image::DynamicImage),
}

impl<'a> ImageSource<'a> {
    pub fn from_path(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

/// How input images are resized before they are turned into tensors.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InputSize {
    /// Keep the images at their original size
    Original,
    /// Scale the image so its shorter side has this length, keeping the
    /// aspect ratio
    ShorterSide(u32),
    /// Scale the image to exactly these dimensions
    Exact(Dims),
}

impl InputSize {
    fn target(self, width: u32, height: u32) -> Dims {
        match self {
            Self::Original => Dims::new(width, height),
            Self::Exact(dims) => dims,
            Self::ShorterSide(side) => {
                if width <= height {
                    let scaled = (f64::from(height) * f64::from(side) / f64::from(width)).round();
                    Dims::new(side, (scaled as u32).max(1))
                } else {
                    let scaled = (f64::from(width) * f64::from(side) / f64::from(height)).round();
                    Dims::new((scaled as u32).max(1), side)
                }
            }
        }
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

pub(crate) fn load_image(src: ImageSource<'_>, size: InputSize) -> Result<image::RgbImage, Error> {
    let img = load_dynamic_image(src)?.to_rgb8();
    let target = size.target(img.width(), img.height());

    let img = if img.width() != target.width || img.height() != target.height {
        image::imageops::resize(
            &img,
            target.width,
            target.height,
            image::imageops::CatmullRom,
        )
    } else {
        img
    };

    Ok(img)
}

/// Converts an RGB image into a `[1, 3, height, width]` tensor with values
/// in `[0, 1]`
pub fn image_to_tensor<B: Backend>(img: &image::RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = img.dimensions();
    let plane = width as usize * height as usize;
    let mut planar = vec![0.0f32; 3 * plane];

    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            planar[c * plane + i] = f32::from(pixel[c]) / 255.0;
        }
    }

    Tensor::from_data(
        TensorData::new(planar, [1, 3, height as usize, width as usize]),
        device,
    )
}

/// Converts a `[1, 3, height, width]` tensor back into an RGB image, values
/// outside of `[0, 1]` are saturated
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 4>) -> Result<image::RgbImage, Error> {
    let dims = tensor.dims();
    if dims[0] != 1 || dims[1] != 3 {
        return Err(Error::InvalidShape(dims));
    }

    let [_, _, height, width] = dims;
    let plane = width * height;
    let planar = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData(format!("{:?}", err)))?;

    let mut img = image::RgbImage::new(width as u32, height as u32);
    for (i, pixel) in img.pixels_mut().enumerate() {
        for c in 0..3 {
            let value = planar[c * plane + i].max(0.0).min(1.0);
            pixel[c] = (value * 255.0).round() as u8;
        }
    }

    Ok(img)
}

/// Uniform white noise in `[0, 1)`, reproducible for a given seed
pub(crate) fn white_noise<B: Backend>(dims: [usize; 4], seed: u64, device: &B::Device) -> Tensor<B, 4> {
    let mut rng = Pcg32::seed_from_u64(seed);
    let len = dims.iter().product();
    let values: Vec<f32> = (0..len).map(|_| rng.gen::<f32>()).collect();

    Tensor::from_data(TensorData::new(values, dims), device)
}
