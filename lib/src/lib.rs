// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `neural-style` is a small API for neural style transfer: it repaints a
//! content image in the style of another image by optimizing the pixels of a
//! working image so that a frozen convolutional network "sees" the content of
//! one image and the textures of the other.
//!
//! First, you build a `Session` via a `SessionBuilder`, which follows the builder pattern. Calling
//! `build` on the `SessionBuilder` loads the input images, checks for various errors and
//! prepares the feature pipeline.
//!
//! `Session` has a `run()` method that performs every iteration and returns the final image
//! as a `GeneratedImage`, or a `steps()` method that hands out the intermediate images one
//! iteration at a time.
//!
//! You can save, stream, or inspect the image from `GeneratedImage`.
//!
//! ## How it works
//!
//! 1. The feature extractor (usually VGG-19) is walked stage by stage, and loss probes are
//!    inserted after the requested layers. Content probes compare activations directly, style
//!    probes compare their Gram matrices.
//! 2. The extractor is truncated after the deepest probe.
//! 3. L-BFGS minimizes `style_weight * style_loss + content_weight * content_loss` with respect
//!    to the working image's pixels, which are kept in `[0, 1]`.
//!
//! ## Usage
//! Session follows a "builder pattern" for defining parameters, meaning you chain functions together.
//!
//! ```no_run
//! use neural_style::{burn::backend::{Autodiff, NdArray}, FeatureExtractor, Session};
//!
//! let device = Default::default();
//!
//! // Load the pretrained weights of the feature extractor
//! let extractor = FeatureExtractor::<Autodiff<NdArray<f32>>>::vgg19(&device)
//!     .load_weights("vgg19", &device)
//!     .expect("failed to load extractor weights");
//!
//! // Create a new session with default parameters
//! let session = Session::builder()
//!     // Set some parameters
//!     .iterations(200)
//!     .style_weight(1e5)
//!     // Specify the input images
//!     .content(&"imgs/dancing.jpg")
//!     .style(&"imgs/picasso.jpg")
//!     // Build the session
//!     .build(&extractor, &device)
//!     .expect("failed to build session");
//!
//! // Generate a new image
//! let generated_img = session.run(None).expect("failed to generate image");
//!
//! // Save the generated image to disk
//! generated_img.save("my_generated_img.jpg").expect("failed to save generated image");
//! ```
mod errors;
pub mod extractor;
mod gram;
pub mod lbfgs;
mod normalization;
pub mod pipeline;
pub mod probe;
pub mod session;
pub mod transfer;
mod utils;
use utils::*;

pub use burn;
pub use image;
use burn::backend::{Autodiff, NdArray};
use std::path::Path;

pub use errors::{Error, InvalidRange, SizeMismatch, WeightMismatch};
pub use extractor::{FeatureExtractor, LayerKind, Layout};
pub use gram::gram_matrix;
pub use lbfgs::LbfgsConfig;
pub use normalization::{Normalization, NormalizationStats};
pub use session::{GeneratorProgress, Init, ProgressStat, ProgressUpdate, Session, SessionBuilder};
pub use transfer::{run_style_transfer, Step, StyleTransfer, TransferConfig};
pub use utils::{image_to_tensor, load_dynamic_image, tensor_to_image, ImageSource, InputSize};

/// The CPU backend with automatic differentiation
pub type DefaultBackend = Autodiff<NdArray<f32>>;

/// Simple dimensions struct
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

struct Parameters {
    input_size: InputSize,
    seed: u64,
    stats: NormalizationStats,
    transfer: TransferConfig,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            input_size: InputSize::ShorterSide(128),
            seed: 0,
            stats: NormalizationStats::IMAGENET,
            transfer: TransferConfig::default(),
        }
    }
}

/// An image generated by a `Session::run()`
pub struct GeneratedImage {
    inner: image::RgbImage,
}

impl GeneratedImage {
    /// Saves the generated image to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(parent_path)?;
        }

        self.inner.save(path)?;
        Ok(())
    }

    /// Writes the generated image to the specified stream
    pub fn write<W: std::io::Write>(
        self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        // encoders need to seek, so encode into memory first
        let mut encoded = std::io::Cursor::new(Vec::new());
        self.into_image().write_to(&mut encoded, fmt)?;
        writer.write_all(encoded.get_ref())?;
        Ok(())
    }

    /// Returns the generated output image
    pub fn into_image(self) -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(self.inner)
    }
}

impl AsRef<image::RgbImage> for GeneratedImage {
    fn as_ref(&self) -> &image::RgbImage {
        &self.inner
    }
}
