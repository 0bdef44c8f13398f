use std::fmt;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f64,
    pub(crate) max: f64,
    pub(crate) value: f64,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

#[derive(Debug)]
pub struct SizeMismatch {
    pub(crate) what: &'static str,
    pub(crate) expected: [usize; 4],
    pub(crate) actual: [usize; 4],
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the {} image has shape {:?}, but the content image has shape {:?}",
            self.what, self.actual, self.expected
        )
    }
}

#[derive(Debug)]
pub struct WeightMismatch {
    pub(crate) what: String,
    pub(crate) expected: Vec<usize>,
    pub(crate) actual: Vec<usize>,
}

impl fmt::Display for WeightMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the weights don't match the extractor layout: {} should be {:?}, but is {:?}",
            self.what, self.expected, self.actual
        )
    }
}

#[derive(Debug)]
pub enum Error {
    /// An error in the image library occurred, eg failed to load/save
    Image(image::ImageError),
    /// Io is notoriously error free with no problems, but we cover it just in case!
    Io(std::io::Error),
    /// Pretrained extractor weights could not be loaded
    Record(burn::record::RecorderError),
    /// Loaded extractor weights have a different structure than the layout
    WeightMismatch(WeightMismatch),
    /// The content or style image wasn't provided to the session builder
    MissingInput(&'static str),
    /// An input parameter had an invalid range specified
    InvalidRange(InvalidRange),
    /// The content, style and initial images must all have the same shape
    SizeMismatch(SizeMismatch),
    /// Image tensors must be shaped `[1, 3, height, width]`
    InvalidShape([usize; 4]),
    /// The extractor layout contained a stage we don't know how to run
    UnsupportedStage(String),
    /// A requested content or style layer does not exist in the extractor
    LayerNotFound(String),
    /// The same layer was requested twice in one layer set
    DuplicateLayer(String),
    /// Neither content nor style layers were requested, so there is nothing
    /// to optimize
    NoLossLayers,
    /// A tensor could not be read back as pixel data
    TensorData(String),
    /// The user specified an image format we don't support as the output
    UnsupportedOutputFormat(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Record(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ie) => write!(f, "{}", ie),
            Self::Io(io) => write!(f, "{}", io),
            Self::Record(re) => write!(f, "failed to load extractor weights: {}", re),
            Self::WeightMismatch(wm) => write!(f, "{}", wm),
            Self::MissingInput(what) => write!(f, "no {} image was provided", what),
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::SizeMismatch(sm) => write!(f, "{}", sm),
            Self::InvalidShape(dims) => write!(
                f,
                "image tensors must have shape [1, 3, height, width], got {:?}",
                dims
            ),
            Self::UnsupportedStage(token) => {
                write!(f, "the extractor stage '{}' is not supported", token)
            }
            Self::LayerNotFound(name) => {
                write!(f, "the layer '{}' does not exist in the extractor", name)
            }
            Self::DuplicateLayer(name) => {
                write!(f, "the layer '{}' was requested more than once", name)
            }
            Self::NoLossLayers => write!(
                f,
                "at least 1 content or style layer must be requested"
            ),
            Self::TensorData(msg) => write!(f, "failed to read tensor data: {}", msg),
            Self::UnsupportedOutputFormat(fmt) => {
                write!(f, "the output format '{}' is not supported", fmt)
            }
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(ie: image::ImageError) -> Self {
        Self::Image(ie)
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::Io(io)
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(re: burn::record::RecorderError) -> Self {
        Self::Record(re)
    }
}
