//! Construction of the truncated feature pipeline.
//!
//! The pipeline starts with the input normalization, followed by the stages
//! of a [`FeatureExtractor`] with [`LossProbe`]s spliced in directly after
//! the requested layers. Everything after the deepest probe is dropped, as it
//! can never influence a loss.

use crate::{
    errors::SizeMismatch,
    extractor::{ExtractorStage, FeatureExtractor, Role},
    normalization::{Normalization, NormalizationStats},
    probe::{ContentProbe, LossProbe, StyleProbe},
    Error,
};
use burn::tensor::{backend::Backend, Tensor};
use std::collections::HashMap;

/// A single step of a [`Pipeline`].
#[derive(Clone, Debug)]
pub enum Stage<B: Backend> {
    Normalization(Normalization<B>),
    Extractor(ExtractorStage<B>),
    Content(ContentProbe<B>),
    Style(StyleProbe<B>),
}

impl<B: Backend> Stage<B> {
    fn forward(&mut self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Normalization(norm) => norm.forward(input),
            Self::Extractor(stage) => stage.forward(input),
            Self::Content(probe) => probe.forward(input),
            Self::Style(probe) => probe.forward(input),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NamedStage<B: Backend> {
    pub name: String,
    pub stage: Stage<B>,
}

/// Points at a probe inside the [`Pipeline`] it was built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeHandle {
    index: usize,
    layer: String,
}

impl ProbeHandle {
    /// Position of the probe in the pipeline
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the layer the probe is attached to, eg. `conv_4`
    pub fn layer(&self) -> &str {
        &self.layer
    }
}

/// An ordered list of named stages, evaluated one after the other.
#[derive(Clone, Debug)]
pub struct Pipeline<B: Backend> {
    stages: Vec<NamedStage<B>>,
}

impl<B: Backend> Pipeline<B> {
    /// Runs `input` through every stage. The probes record their losses as
    /// a side effect; the returned activations are rarely interesting.
    pub fn forward(&mut self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.stages
            .iter_mut()
            .fold(input, |x, named| named.stage.forward(x))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[NamedStage<B>] {
        &self.stages
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.stages.iter().map(|named| named.name.as_str())
    }

    /// The probe a handle points to, `None` if the handle belongs to a
    /// different pipeline
    pub fn probe(&self, handle: &ProbeHandle) -> Option<&dyn LossProbe<B>> {
        match &self.stages.get(handle.index)?.stage {
            Stage::Content(probe) => Some(probe),
            Stage::Style(probe) => Some(probe),
            _ => None,
        }
    }
}

/// The output of [`build_pipeline`]: the pipeline plus handles to the
/// probes inserted into it, in insertion order.
#[derive(Clone, Debug)]
pub struct BuiltPipeline<B: Backend> {
    pub pipeline: Pipeline<B>,
    pub content_probes: Vec<ProbeHandle>,
    pub style_probes: Vec<ProbeHandle>,
}

fn check_layers(layers: &[String]) -> Result<(), Error> {
    for (i, layer) in layers.iter().enumerate() {
        if layers[..i].contains(layer) {
            return Err(Error::DuplicateLayer(layer.clone()));
        }
    }

    Ok(())
}

/// Builds a pipeline that normalizes its input, runs it through the
/// extractor and measures content and style losses at the requested layers.
///
/// Extractor stages are named after their role and a per-role counter, so
/// the first convolution is `conv_1`, the second ReLU `relu_2`, the third
/// pooling stage `pool_3` and so on. The content and style targets are
/// captured from `content_image` and `style_image` while walking the
/// extractor.
#[allow(clippy::too_many_arguments)]
pub fn build_pipeline<B: Backend>(
    extractor: &FeatureExtractor<B>,
    stats: &NormalizationStats,
    style_image: Tensor<B, 4>,
    content_image: Tensor<B, 4>,
    content_layers: &[String],
    style_layers: &[String],
    device: &B::Device,
) -> Result<BuiltPipeline<B>, Error> {
    check_layers(content_layers)?;
    check_layers(style_layers)?;

    if content_layers.is_empty() && style_layers.is_empty() {
        return Err(Error::NoLossLayers);
    }

    if style_image.dims() != content_image.dims() {
        return Err(Error::SizeMismatch(SizeMismatch {
            what: "style",
            expected: content_image.dims(),
            actual: style_image.dims(),
        }));
    }

    let normalization = Normalization::new(stats, device);
    let mut content = normalization.forward(content_image).detach();
    let mut style = normalization.forward(style_image).detach();

    let mut stages = vec![NamedStage {
        name: "normalization".to_owned(),
        stage: Stage::Normalization(normalization),
    }];
    let mut content_probes = Vec::with_capacity(content_layers.len());
    let mut style_probes = Vec::with_capacity(style_layers.len());
    let mut counters: HashMap<Role, usize> = HashMap::new();
    let requested = content_layers.len() + style_layers.len();

    for stage in extractor.stages() {
        if content_probes.len() + style_probes.len() == requested {
            break;
        }

        let role = stage.role();
        let counter = counters.entry(role).or_insert(0);
        *counter += 1;
        let name = format!("{}_{}", role.prefix(), counter);

        content = stage.forward(content);
        style = stage.forward(style);
        stages.push(NamedStage {
            name: name.clone(),
            stage: Stage::Extractor(stage),
        });

        if content_layers.contains(&name) {
            stages.push(NamedStage {
                name: format!("content_loss_{}", content_probes.len() + 1),
                stage: Stage::Content(ContentProbe::new(content.clone())),
            });
            content_probes.push(ProbeHandle {
                index: stages.len() - 1,
                layer: name.clone(),
            });
        }

        if style_layers.contains(&name) {
            stages.push(NamedStage {
                name: format!("style_loss_{}", style_probes.len() + 1),
                stage: Stage::Style(StyleProbe::new(style.clone())),
            });
            style_probes.push(ProbeHandle {
                index: stages.len() - 1,
                layer: name,
            });
        }
    }

    let missing = content_layers
        .iter()
        .filter(|layer| !content_probes.iter().any(|p| &p.layer == *layer))
        .chain(
            style_layers
                .iter()
                .filter(|layer| !style_probes.iter().any(|p| &p.layer == *layer)),
        )
        .next();
    if let Some(layer) = missing {
        return Err(Error::LayerNotFound(layer.clone()));
    }

    let last_probe = content_probes
        .iter()
        .chain(style_probes.iter())
        .map(ProbeHandle::index)
        .max()
        .unwrap_or(0);
    stages.truncate(last_probe + 1);

    log::info!(
        "built a pipeline of {} stages with {} content and {} style probes",
        stages.len(),
        content_probes.len(),
        style_probes.len()
    );

    Ok(BuiltPipeline {
        pipeline: Pipeline { stages },
        content_probes,
        style_probes,
    })
}
