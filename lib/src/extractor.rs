//! Adapter around a pretrained convolutional network.
//!
//! The network is described by a [`Layout`], an ordered list of tagged layer
//! kinds, plus the convolution weights that go with it. The pipeline builder
//! only ever sees the tagged [`ExtractorStage`]s produced by
//! [`FeatureExtractor::stages`].

use crate::{errors::WeightMismatch, Error};
use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{activation::relu, backend::Backend, Tensor},
};
use std::{path::PathBuf, str::FromStr};

/// Channel count and number of convolutions of each VGG-19 block, every
/// block ends with a max pool
const VGG19_BLOCKS: [(usize, usize); 5] = [(64, 2), (128, 2), (256, 4), (512, 4), (512, 4)];

/// The structural role of a stage, used to name it
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Conv,
    Relu,
    Pool,
}

impl Role {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Conv => "conv",
            Self::Relu => "relu",
            Self::Pool => "pool",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// 3x3 convolution, stride 1, padding 1
    Conv { out_channels: usize },
    Relu,
    /// 2x2 max pool, stride 2
    MaxPool,
    /// 2x2 average pool, stride 2
    AvgPool,
}

impl LayerKind {
    pub fn role(self) -> Role {
        match self {
            Self::Conv { .. } => Role::Conv,
            Self::Relu => Role::Relu,
            Self::MaxPool | Self::AvgPool => Role::Pool,
        }
    }
}

impl FromStr for LayerKind {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "relu" => Ok(Self::Relu),
            "maxpool" => Ok(Self::MaxPool),
            "avgpool" => Ok(Self::AvgPool),
            other => other
                .strip_prefix("conv")
                .and_then(|channels| channels.parse::<usize>().ok())
                .filter(|channels| *channels > 0)
                .map(|out_channels| Self::Conv { out_channels })
                .ok_or_else(|| Error::UnsupportedStage(other.to_owned())),
        }
    }
}

/// The ordered layer structure of a feature extractor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    layers: Vec<LayerKind>,
}

impl Layout {
    pub fn new(layers: Vec<LayerKind>) -> Self {
        Self { layers }
    }

    /// The `features` block of VGG-19
    pub fn vgg19() -> Self {
        let mut layers = Vec::with_capacity(37);
        for &(out_channels, convs) in VGG19_BLOCKS.iter() {
            for _ in 0..convs {
                layers.push(LayerKind::Conv { out_channels });
                layers.push(LayerKind::Relu);
            }
            layers.push(LayerKind::MaxPool);
        }

        Self { layers }
    }

    pub fn layers(&self) -> &[LayerKind] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// `[in_channels, out_channels]` of every convolution, for RGB input
    fn conv_channels(&self) -> Vec<[usize; 2]> {
        let mut in_channels = 3;

        self.layers
            .iter()
            .filter_map(|layer| match *layer {
                LayerKind::Conv { out_channels } => {
                    let channels = [in_channels, out_channels];
                    in_channels = out_channels;
                    Some(channels)
                }
                _ => None,
            })
            .collect()
    }
}

/// Parses a whitespace or comma separated list of `conv<channels>`, `relu`,
/// `maxpool` and `avgpool` tokens, eg. `"conv64 relu conv64 relu maxpool"`.
impl FromStr for Layout {
    type Err = Error;

    fn from_str(desc: &str) -> Result<Self, Self::Err> {
        let layers = desc
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { layers })
    }
}

/// The trainable part of an extractor, kept separate so it can go through
/// burn's record machinery.
#[derive(Module, Debug)]
pub struct ExtractorWeights<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

/// One stage of an extractor, tagged with what it does.
#[derive(Clone, Debug)]
pub enum ExtractorStage<B: Backend> {
    Conv(Conv2d<B>),
    Relu,
    MaxPool(MaxPool2d),
    AvgPool(AvgPool2d),
}

impl<B: Backend> ExtractorStage<B> {
    pub fn role(&self) -> Role {
        match self {
            Self::Conv(_) => Role::Conv,
            Self::Relu => Role::Relu,
            Self::MaxPool(_) | Self::AvgPool(_) => Role::Pool,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Conv(conv) => conv.forward(input),
            // never in place, earlier probes may still hold the input
            Self::Relu => relu(input),
            Self::MaxPool(pool) => pool.forward(input),
            Self::AvgPool(pool) => pool.forward(input),
        }
    }
}

/// A frozen convolutional feature extractor.
///
/// The weights never require gradients, only the image being optimized does.
#[derive(Clone, Debug)]
pub struct FeatureExtractor<B: Backend> {
    layout: Layout,
    weights: ExtractorWeights<B>,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Creates an extractor with freshly initialized weights, expecting RGB
    /// input.
    pub fn new(layout: Layout, device: &B::Device) -> Self {
        let convs = layout
            .conv_channels()
            .into_iter()
            .map(|channels| {
                Conv2dConfig::new(channels, [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();

        Self {
            layout,
            weights: ExtractorWeights { convs }.no_grad(),
        }
    }

    /// VGG-19 with freshly initialized weights, use `load_weights` (or
    /// `load_pytorch_weights`) to make it useful.
    pub fn vgg19(device: &B::Device) -> Self {
        Self::new(Layout::vgg19(), device)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Loads weights previously written by `save_weights`. The `.mpk`
    /// extension is added to the path.
    pub fn load_weights<P: Into<PathBuf>>(
        self,
        path: P,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder.load(path.into(), device)?;

        self.with_record(record)
    }

    /// Checks that every convolution in `record` has the shape the layout
    /// asks for.
    fn check_record(&self, record: &ExtractorWeightsRecord<B>) -> Result<(), Error> {
        let channels = self.layout.conv_channels();

        if record.convs.len() != channels.len() {
            return Err(Error::WeightMismatch(WeightMismatch {
                what: "the number of convolutions".to_owned(),
                expected: vec![channels.len()],
                actual: vec![record.convs.len()],
            }));
        }

        for (i, (conv, [in_channels, out_channels])) in
            record.convs.iter().zip(channels).enumerate()
        {
            let weight = conv.weight.val().dims();
            if weight != [out_channels, in_channels, 3, 3] {
                return Err(Error::WeightMismatch(WeightMismatch {
                    what: format!("the weight of conv_{}", i + 1),
                    expected: vec![out_channels, in_channels, 3, 3],
                    actual: weight.to_vec(),
                }));
            }

            if let Some(ref bias) = conv.bias {
                let bias = bias.val().dims();
                if bias != [out_channels] {
                    return Err(Error::WeightMismatch(WeightMismatch {
                        what: format!("the bias of conv_{}", i + 1),
                        expected: vec![out_channels],
                        actual: bias.to_vec(),
                    }));
                }
            }
        }

        Ok(())
    }

    fn with_record(self, record: ExtractorWeightsRecord<B>) -> Result<Self, Error> {
        self.check_record(&record)?;

        let weights = self.weights.load_record(record).no_grad();
        log::info!("loaded weights for {} convolutions", weights.convs.len());

        Ok(Self {
            layout: self.layout,
            weights,
        })
    }

    /// Saves the weights in burn's named MessagePack format. The `.mpk`
    /// extension is added to the path.
    pub fn save_weights<P: Into<PathBuf>>(&self, path: P) -> Result<(), Error> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.weights.clone().save_file(path, &recorder)?;
        Ok(())
    }

    /// Loads a torchvision state dict, eg. `vgg19-dcbb9e9d.pth`, whose
    /// `features.<index>` keys follow this extractor's layout.
    #[cfg(feature = "pytorch")]
    pub fn load_pytorch_weights<P: Into<PathBuf>>(
        self,
        path: P,
        device: &B::Device,
    ) -> Result<Self, Error> {
        use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

        let mut args = LoadArgs::new(path.into());
        let conv_indices = self
            .layout
            .layers()
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.role() == Role::Conv)
            .map(|(index, _)| index);

        for (conv, index) in conv_indices.enumerate() {
            args = args.with_key_remap(
                &format!(r"^features\.{}\.(weight|bias)$", index),
                &format!("convs.{}.$1", conv),
            );
        }

        let record = PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)?;

        self.with_record(record)
    }

    /// The tagged stages, in order
    pub fn stages(&self) -> Vec<ExtractorStage<B>> {
        // there is exactly one convolution per conv layer, both `new` and
        // the weight loaders uphold that
        let mut conv = 0;

        self.layout
            .layers()
            .iter()
            .map(|layer| match *layer {
                LayerKind::Conv { .. } => {
                    conv += 1;
                    ExtractorStage::Conv(self.weights.convs[conv - 1].clone())
                }
                LayerKind::Relu => ExtractorStage::Relu,
                LayerKind::MaxPool => ExtractorStage::MaxPool(
                    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                ),
                LayerKind::AvgPool => ExtractorStage::AvgPool(
                    AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                ),
            })
            .collect()
    }
}
