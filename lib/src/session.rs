use crate::*;
use burn::tensor::backend::AutodiffBackend;

/// Style transfer session.
///
/// Calling `run()` will optimize the working image and return the result,
/// consuming the session in the process. You can provide a
/// `GeneratorProgress` implementation to get an update with the current
/// image and scores after every iteration. If you want to drive the
/// optimization yourself, `steps()` returns the lazy sequence of
/// intermediate images instead.
///
/// # Example
/// ```no_run
/// use neural_style::burn::backend::{Autodiff, NdArray};
///
/// type B = Autodiff<NdArray<f32>>;
///
/// let device = Default::default();
/// let extractor = neural_style::FeatureExtractor::<B>::vgg19(&device)
///     .load_weights("vgg19", &device)
///     .expect("failed to load weights");
///
/// let session = neural_style::Session::builder()
///     .content(&"imgs/dancing.jpg")
///     .style(&"imgs/picasso.jpg")
///     .iterations(100)
///     .build(&extractor, &device)
///     .expect("failed to build session");
///
/// let generated_img = session.run(None).expect("failed to run session");
/// generated_img.save("my_generated_img.jpg").expect("failed to save image");
/// ```
pub struct Session<B: AutodiffBackend> {
    transfer: StyleTransfer<B>,
}

impl Session<DefaultBackend> {
    /// Creates a new session with default parameters.
    ///
    /// The builder isn't tied to the default backend, `build` picks the
    /// backend from the extractor it is given.
    pub fn builder<'a>() -> SessionBuilder<'a> {
        SessionBuilder::default()
    }
}

impl<B: AutodiffBackend> Session<B> {
    /// The lazy sequence of intermediate images, one per iteration.
    pub fn steps(self) -> StyleTransfer<B> {
        self.transfer
    }

    /// Runs every iteration and outputs the final image.
    pub fn run(
        self,
        mut progress: Option<Box<dyn GeneratorProgress>>,
    ) -> Result<GeneratedImage, Error> {
        let total = self.transfer.iterations() as usize;
        let mut image = self.transfer.image();

        for step in self.transfer {
            if let Some(ref mut progress) = progress {
                let current = tensor_to_image(step.image.clone())?;

                progress.update(ProgressUpdate {
                    image: &current,
                    total: ProgressStat {
                        current: step.iteration as usize,
                        total,
                    },
                    loss: step.loss,
                    content_score: step.content_score,
                    style_score: step.style_score,
                });
            }

            image = step.image;
        }

        Ok(GeneratedImage {
            inner: tensor_to_image(image)?,
        })
    }
}

/// The image the optimization starts from
pub enum Init<'a> {
    /// A copy of the content image
    Content,
    /// Uniform white noise, seeded with the session's seed
    Noise,
    /// A user supplied image, resized to the content image's size
    Image(ImageSource<'a>),
}

impl<'a> Default for Init<'a> {
    fn default() -> Self {
        Self::Content
    }
}

/// Builds a session by setting parameters and adding input images, calling
/// `build` will check all of the provided inputs to verify that style
/// transfer will provide valid output
#[derive(Default)]
pub struct SessionBuilder<'a> {
    content: Option<ImageSource<'a>>,
    style: Option<ImageSource<'a>>,
    init: Init<'a>,
    params: Parameters,
}

impl<'a> SessionBuilder<'a> {
    /// Creates a new `SessionBuilder`, can also be created via
    /// `Session::builder()`
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image whose structure should be preserved.
    pub fn content<I: Into<ImageSource<'a>>>(mut self, content: I) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets the image whose textures and colors should be transferred onto
    /// the content.
    ///
    /// After resizing, the style image must be the same size as the content
    /// image.
    pub fn style<I: Into<ImageSource<'a>>>(mut self, style: I) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Sets the image the optimization starts from.
    ///
    /// Default: `Init::Content`
    pub fn init(mut self, init: Init<'a>) -> Self {
        self.init = init;
        self
    }

    /// How the content and style images are resized before optimization.
    ///
    /// Default: `InputSize::ShorterSide(128)`
    pub fn input_size(mut self, size: InputSize) -> Self {
        self.params.input_size = size;
        self
    }

    /// Changes the seed used for `Init::Noise`.
    ///
    /// Runs that don't start from noise are fully deterministic.
    pub fn seed(mut self, value: u64) -> Self {
        self.params.seed = value;
        self
    }

    /// The number of optimizer steps to perform.
    ///
    /// Default: 300
    pub fn iterations(mut self, count: u32) -> Self {
        self.params.transfer.iterations = count;
        self
    }

    /// How strongly the style loss is weighted.
    ///
    /// Style losses are tiny compared to content losses, so this is usually
    /// several orders of magnitude larger than the content weight.
    ///
    /// Default: 1e6
    pub fn style_weight(mut self, weight: f64) -> Self {
        self.params.transfer.style_weight = weight;
        self
    }

    /// How strongly the content loss is weighted.
    ///
    /// Default: 1.0
    pub fn content_weight(mut self, weight: f64) -> Self {
        self.params.transfer.content_weight = weight;
        self
    }

    /// The layers at which the content loss is measured, eg. `conv_4`.
    ///
    /// Default: `conv_4`
    pub fn content_layers<S: Into<String>, I: IntoIterator<Item = S>>(mut self, layers: I) -> Self {
        self.params.transfer.content_layers = layers.into_iter().map(Into::into).collect();
        self
    }

    /// The layers at which the style loss is measured.
    ///
    /// Default: `conv_1` through `conv_5`
    pub fn style_layers<S: Into<String>, I: IntoIterator<Item = S>>(mut self, layers: I) -> Self {
        self.params.transfer.style_layers = layers.into_iter().map(Into::into).collect();
        self
    }

    /// The per-channel statistics the extractor was trained with.
    ///
    /// Default: `NormalizationStats::IMAGENET`
    pub fn normalization(mut self, stats: NormalizationStats) -> Self {
        self.params.stats = stats;
        self
    }

    /// Tunes the optimizer.
    pub fn lbfgs(mut self, config: LbfgsConfig) -> Self {
        self.params.transfer.lbfgs = config;
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or input
    /// images were specified.
    pub fn build<B: AutodiffBackend>(
        self,
        extractor: &FeatureExtractor<B>,
        device: &B::Device,
    ) -> Result<Session<B>, Error> {
        self.params.transfer.validate()?;
        self.check_input_size()?;

        let content_src = self.content.ok_or(Error::MissingInput("content"))?;
        let style_src = self.style.ok_or(Error::MissingInput("style"))?;

        let content_img = load_image(content_src, self.params.input_size)?;
        let style_img = load_image(style_src, self.params.input_size)?;

        let content = image_to_tensor::<B>(&content_img, device).inner();
        let style = image_to_tensor::<B>(&style_img, device).inner();

        let input = match self.init {
            Init::Content => content.clone(),
            Init::Noise => white_noise::<B>(content.dims(), self.params.seed, device).inner(),
            Init::Image(src) => {
                let size = InputSize::Exact(Dims::new(content_img.width(), content_img.height()));
                image_to_tensor::<B>(&load_image(src, size)?, device).inner()
            }
        };

        let transfer = run_style_transfer(
            extractor,
            &self.params.stats,
            content,
            style,
            input,
            &self.params.transfer,
            device,
        )?;

        Ok(Session { transfer })
    }

    fn check_input_size(&self) -> Result<(), Error> {
        let smallest = match self.params.input_size {
            InputSize::Original => return Ok(()),
            InputSize::ShorterSide(side) => side,
            InputSize::Exact(dims) => dims.width.min(dims.height),
        };

        if smallest == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: f64::from(u32::MAX),
                value: 0.0,
                name: "size",
            }));
        }

        Ok(())
    }
}

/// Helper struct for passing progress information to external callers
pub struct ProgressStat {
    /// The current amount of work that has been done
    pub current: usize,
    /// The total amount of work to do
    pub total: usize,
}

/// The current state of the optimization
pub struct ProgressUpdate<'a> {
    /// The image after the latest iteration
    pub image: &'a image::RgbImage,
    /// Completed iterations out of the total
    pub total: ProgressStat,
    /// The weighted loss going into the latest iteration
    pub loss: f64,
    pub content_score: f64,
    pub style_score: f64,
}

/// Allows the session to update external callers with the current
/// progress of the style transfer
pub trait GeneratorProgress {
    fn update(&mut self, info: ProgressUpdate<'_>);
}

impl<G> GeneratorProgress for G
where
    G: FnMut(ProgressUpdate<'_>) + Send,
{
    fn update(&mut self, info: ProgressUpdate<'_>) {
        self(info)
    }
}
