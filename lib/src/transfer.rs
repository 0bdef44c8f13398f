//! The optimization loop, exposed as a lazy sequence of intermediate images.

use crate::{
    errors::{InvalidRange, SizeMismatch},
    extractor::FeatureExtractor,
    lbfgs::{Lbfgs, LbfgsConfig},
    normalization::NormalizationStats,
    pipeline::{build_pipeline, BuiltPipeline, Pipeline, ProbeHandle},
    Error,
};
use burn::tensor::{
    backend::{AutodiffBackend, Backend},
    ElementConversion, Tensor,
};
use std::iter::FusedIterator;

/// Parameters of a single style transfer run.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferConfig {
    /// The number of optimizer steps, ie. the number of images yielded
    pub iterations: u32,
    pub style_weight: f64,
    pub content_weight: f64,
    /// Layers whose activations should match the content image
    pub content_layers: Vec<String>,
    /// Layers whose Gram matrices should match the style image
    pub style_layers: Vec<String>,
    pub lbfgs: LbfgsConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            iterations: 300,
            style_weight: 1e6,
            content_weight: 1.0,
            content_layers: vec!["conv_4".to_owned()],
            style_layers: (1..=5).map(|i| format!("conv_{}", i)).collect(),
            lbfgs: LbfgsConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.iterations == 0 {
            return Err(Error::InvalidRange(InvalidRange {
                min: 1.0,
                max: f64::from(u32::MAX),
                value: 0.0,
                name: "iterations",
            }));
        }

        for (name, value) in [
            ("style-weight", self.style_weight),
            ("content-weight", self.content_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidRange(InvalidRange {
                    min: 0.0,
                    max: f64::MAX,
                    value,
                    name,
                }));
            }
        }

        self.lbfgs.validate()
    }
}

/// The result of evaluating the loss at one image.
#[derive(Clone, Debug)]
pub struct Evaluation<B: Backend> {
    /// `style_weight * style_score + content_weight * content_score`
    pub loss: f64,
    /// Sum of all content probe losses
    pub content_score: f64,
    /// Sum of all style probe losses
    pub style_score: f64,
    /// Gradient of `loss` with respect to the image's pixels
    pub gradient: Tensor<B, 4>,
}

/// Computes the weighted loss of an image, and its gradient, by running it
/// through a pipeline of probes.
pub struct LossObjective<B: AutodiffBackend> {
    pipeline: Pipeline<B>,
    content_probes: Vec<ProbeHandle>,
    style_probes: Vec<ProbeHandle>,
    content_weight: f64,
    style_weight: f64,
}

impl<B: AutodiffBackend> LossObjective<B> {
    pub fn new(built: BuiltPipeline<B>, content_weight: f64, style_weight: f64) -> Self {
        Self {
            pipeline: built.pipeline,
            content_probes: built.content_probes,
            style_probes: built.style_probes,
            content_weight,
            style_weight,
        }
    }

    /// Sums the losses recorded by the last forward pass.
    ///
    /// # Panics
    ///
    /// If a handle doesn't point at a probe of this pipeline that has run.
    fn score(&self, probes: &[ProbeHandle], device: &B::Device) -> Tensor<B, 1> {
        probes
            .iter()
            .map(|handle| {
                self.pipeline
                    .probe(handle)
                    .and_then(|probe| probe.loss())
                    .unwrap_or_else(|| {
                        panic!(
                            "no loss recorded for '{}' at stage {}, the handle must belong to this pipeline",
                            handle.layer(),
                            handle.index()
                        )
                    })
            })
            .fold(Tensor::zeros([1], device), |acc, loss| acc + loss)
    }

    /// Evaluates the loss at `image`. The image is used as is, callers are
    /// expected to keep it in `[0, 1]`.
    pub fn evaluate(&mut self, image: Tensor<B::InnerBackend, 4>) -> Evaluation<B::InnerBackend> {
        let dims = image.dims();
        let inner_device = image.device();
        let input = Tensor::<B, 4>::from_inner(image).require_grad();
        let device = input.device();

        // only the probes' side effects matter
        self.pipeline.forward(input.clone());

        let content = self.score(&self.content_probes, &device);
        let style = self.score(&self.style_probes, &device);
        let total = style.clone().mul_scalar(self.style_weight)
            + content.clone().mul_scalar(self.content_weight);

        let grads = total.backward();
        let gradient = input
            .grad(&grads)
            .unwrap_or_else(|| Tensor::zeros(dims, &inner_device));

        let evaluation = Evaluation {
            loss: total.into_scalar().elem(),
            content_score: content.into_scalar().elem(),
            style_score: style.into_scalar().elem(),
            gradient,
        };

        log::trace!(
            "evaluated loss {} (content {}, style {})",
            evaluation.loss,
            evaluation.content_score,
            evaluation.style_score
        );

        evaluation
    }
}

/// One element of a [`StyleTransfer`] sequence.
#[derive(Clone, Debug)]
pub struct Step<B: Backend> {
    /// 1-based iteration number
    pub iteration: u32,
    /// A snapshot of the working image after this iteration, in `[0, 1]`
    pub image: Tensor<B, 4>,
    /// The total loss of the image going into this iteration
    pub loss: f64,
    pub content_score: f64,
    pub style_score: f64,
}

/// A finite, lazy sequence of progressively stylized images.
///
/// Every call to `next` performs one optimizer step on the working image and
/// yields a snapshot of the result. Dropping the sequence early simply
/// abandons the run; a finished sequence can't be restarted.
pub struct StyleTransfer<B: AutodiffBackend> {
    objective: LossObjective<B>,
    optimizer: Lbfgs<B::InnerBackend>,
    params: Tensor<B::InnerBackend, 1>,
    shape: [usize; 4],
    iteration: u32,
    iterations: u32,
}

impl<B: AutodiffBackend> StyleTransfer<B> {
    pub fn new(
        objective: LossObjective<B>,
        input: Tensor<B::InnerBackend, 4>,
        iterations: u32,
        lbfgs: LbfgsConfig,
    ) -> Self {
        let shape = input.dims();
        let numel = shape.iter().product::<usize>();

        Self {
            objective,
            optimizer: Lbfgs::new(lbfgs),
            params: input.reshape([numel]),
            shape,
            iteration: 0,
            iterations,
        }
    }

    /// The number of iterations completed so far
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// The total number of iterations of this run
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// The current working image
    pub fn image(&self) -> Tensor<B::InnerBackend, 4> {
        self.params.clone().reshape(self.shape)
    }
}

impl<B: AutodiffBackend> Iterator for StyleTransfer<B> {
    type Item = Step<B::InnerBackend>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.iteration >= self.iterations {
            return None;
        }

        let shape = self.shape;
        let numel = self.params.dims()[0];
        let objective = &mut self.objective;
        let mut scores = None;

        let loss = self.optimizer.step(&mut self.params, |params| {
            *params = params.clone().clamp(0.0, 1.0);

            let evaluation = objective.evaluate(params.clone().reshape(shape));
            if scores.is_none() {
                scores = Some((evaluation.content_score, evaluation.style_score));
            }

            (evaluation.loss, evaluation.gradient.reshape([numel]))
        });

        self.params = self.params.clone().clamp(0.0, 1.0);
        self.iteration += 1;

        let (content_score, style_score) = scores.unwrap_or_default();
        log::debug!(
            "iteration {}/{}: content {:.6} style {:.6}",
            self.iteration,
            self.iterations,
            content_score,
            style_score
        );

        if self.iteration == self.iterations {
            log::info!(
                "style transfer finished after {} iterations, loss {}",
                self.iterations,
                loss
            );
        }

        Some(Step {
            iteration: self.iteration,
            image: self.image(),
            loss,
            content_score,
            style_score,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.iterations - self.iteration) as usize;
        (remaining, Some(remaining))
    }
}

impl<B: AutodiffBackend> ExactSizeIterator for StyleTransfer<B> {}
impl<B: AutodiffBackend> FusedIterator for StyleTransfer<B> {}

fn check_image_shape(dims: [usize; 4]) -> Result<(), Error> {
    if dims[0] != 1 || dims[1] != 3 || dims[2] == 0 || dims[3] == 0 {
        return Err(Error::InvalidShape(dims));
    }

    Ok(())
}

/// Starts a style transfer run.
///
/// `content`, `style` and `input` are `[1, 3, height, width]` images with
/// values in `[0, 1]`, all of the same size. `input` is the initial working
/// image, usually a copy of `content` or white noise. Nothing is optimized
/// until the returned sequence is iterated.
pub fn run_style_transfer<B: AutodiffBackend>(
    extractor: &FeatureExtractor<B>,
    stats: &NormalizationStats,
    content: Tensor<B::InnerBackend, 4>,
    style: Tensor<B::InnerBackend, 4>,
    input: Tensor<B::InnerBackend, 4>,
    config: &TransferConfig,
    device: &B::Device,
) -> Result<StyleTransfer<B>, Error> {
    config.validate()?;

    let expected = content.dims();
    check_image_shape(expected)?;

    for (what, actual) in [("style", style.dims()), ("initial", input.dims())] {
        if actual != expected {
            return Err(Error::SizeMismatch(SizeMismatch {
                what,
                expected,
                actual,
            }));
        }
    }

    log::info!(
        "starting style transfer of a {}x{} image for {} iterations",
        expected[3],
        expected[2],
        config.iterations
    );

    let built = build_pipeline(
        extractor,
        stats,
        Tensor::<B, 4>::from_inner(style).to_device(device),
        Tensor::<B, 4>::from_inner(content).to_device(device),
        &config.content_layers,
        &config.style_layers,
        device,
    )?;

    let objective = LossObjective::new(built, config.content_weight, config.style_weight);
    let input = Tensor::<B, 4>::from_inner(input)
        .to_device(device)
        .inner()
        .clamp(0.0, 1.0);

    Ok(StyleTransfer::new(
        objective,
        input,
        config.iterations,
        config.lbfgs,
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extractor::Layout;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::Distribution,
    };

    type Inner = NdArray<f32>;
    type B = Autodiff<Inner>;

    const LAYOUT: &str = "conv4 relu conv4 relu maxpool conv8 relu";

    fn extractor() -> FeatureExtractor<B> {
        FeatureExtractor::new(LAYOUT.parse::<Layout>().unwrap(), &Default::default())
    }

    fn image(size: usize) -> Tensor<Inner, 4> {
        Tensor::random([1, 3, size, size], Distribution::Default, &Default::default())
    }

    fn config(iterations: u32) -> TransferConfig {
        TransferConfig {
            iterations,
            content_layers: vec!["conv_2".to_owned()],
            style_layers: vec!["conv_1".to_owned(), "conv_3".to_owned()],
            ..Default::default()
        }
    }

    fn values(t: Tensor<Inner, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn default_config() {
        let config = TransferConfig::default();

        assert_eq!(config.iterations, 300);
        assert_eq!(config.content_layers, vec!["conv_4"]);
        assert_eq!(
            config.style_layers,
            vec!["conv_1", "conv_2", "conv_3", "conv_4", "conv_5"]
        );
        assert!(config.style_weight > config.content_weight * 1e3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_configs() {
        let bad = [
            config(0),
            TransferConfig {
                style_weight: -1.0,
                ..config(1)
            },
            TransferConfig {
                content_weight: f64::INFINITY,
                ..config(1)
            },
            TransferConfig {
                lbfgs: LbfgsConfig {
                    history_size: 0,
                    ..Default::default()
                },
                ..config(1)
            },
        ];

        for config in &bad {
            assert!(matches!(config.validate(), Err(Error::InvalidRange(_))));
        }
    }

    #[test]
    fn yields_one_step_per_iteration() {
        let content = image(8);
        let mut steps = run_style_transfer(
            &extractor(),
            &NormalizationStats::IMAGENET,
            content.clone(),
            image(8),
            content,
            &config(4),
            &Default::default(),
        )
        .unwrap();

        assert_eq!(steps.len(), 4);

        let iterations: Vec<_> = steps.by_ref().map(|step| step.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3, 4]);
        assert!(steps.next().is_none());
        assert_eq!(steps.iteration(), 4);
    }

    #[test]
    fn images_stay_in_range() {
        // start far outside the valid range
        let content = image(8);
        let input = image(8).mul_scalar(4.0).sub_scalar(2.0);

        let steps = run_style_transfer(
            &extractor(),
            &NormalizationStats::IMAGENET,
            content,
            image(8),
            input,
            &config(3),
            &Default::default(),
        )
        .unwrap();

        for step in steps {
            assert_eq!(step.image.dims(), [1, 3, 8, 8]);
            assert!(values(step.image).iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn identical_inputs_give_identical_trajectories() {
        let extractor = extractor();
        let content = image(8);
        let style = image(8);

        let run = |extractor: &FeatureExtractor<B>| -> Vec<f64> {
            run_style_transfer(
                extractor,
                &NormalizationStats::IMAGENET,
                content.clone(),
                style.clone(),
                content.clone(),
                &config(5),
                &Default::default(),
            )
            .unwrap()
            .map(|step| step.loss)
            .collect()
        };

        let first = run(&extractor);
        let second = run(&extractor.clone());
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }

    #[test]
    fn matching_images_are_a_fixed_point() {
        let img = image(128);
        let steps = run_style_transfer(
            &extractor(),
            &NormalizationStats::IMAGENET,
            img.clone(),
            img.clone(),
            img.clone(),
            &config(3),
            &Default::default(),
        )
        .unwrap();

        let mut last = None;
        for step in steps {
            assert!(step.content_score.abs() < 1e-9);
            assert!(step.style_score.abs() < 1e-9);
            last = Some(step.image);
        }

        let last = values(last.unwrap());
        let original = values(img);
        for (a, b) in last.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    #[should_panic(expected = "no loss recorded for 'conv_3'")]
    fn handles_must_belong_to_the_pipeline() {
        let device = Default::default();
        let build = |layer: &str| {
            build_pipeline(
                &extractor(),
                &NormalizationStats::IMAGENET,
                Tensor::<B, 4>::from_inner(image(8)),
                Tensor::<B, 4>::from_inner(image(8)),
                &[layer.to_owned()],
                &[],
                &device,
            )
            .unwrap()
        };

        let short = build("conv_1");
        let long = build("conv_3");
        let mismatched = BuiltPipeline {
            pipeline: short.pipeline,
            content_probes: long.content_probes,
            style_probes: long.style_probes,
        };

        LossObjective::new(mismatched, 1.0, 1.0).evaluate(image(8));
    }

    #[test]
    fn zero_content_weight_ignores_the_content_target() {
        let device = Default::default();
        let extractor = extractor();
        let style = image(8);
        let content = image(8);
        let perturbed = content.clone().add_scalar(0.25);
        let working = image(8);

        let gradient = |content: Tensor<Inner, 4>| -> Vec<f32> {
            let built = build_pipeline(
                &extractor,
                &NormalizationStats::IMAGENET,
                Tensor::from_inner(style.clone()),
                Tensor::from_inner(content),
                &["conv_2".to_owned()],
                &["conv_1".to_owned(), "conv_3".to_owned()],
                &device,
            )
            .unwrap();

            let mut objective = LossObjective::new(built, 0.0, 1e6);
            let evaluation = objective.evaluate(working.clone());
            assert!(evaluation.content_score > 0.0);
            values(evaluation.gradient)
        };

        assert_eq!(gradient(content), gradient(perturbed));
    }

    #[test]
    fn content_only_objective_has_zero_gradient_at_the_target() {
        let device = Default::default();
        let content = image(8);

        let built = build_pipeline(
            &extractor(),
            &NormalizationStats::IMAGENET,
            Tensor::from_inner(image(8)),
            Tensor::from_inner(content.clone()),
            &["relu_2".to_owned()],
            &[],
            &device,
        )
        .unwrap();

        let evaluation = LossObjective::new(built, 1.0, 1e6).evaluate(content);
        assert_eq!(evaluation.loss, 0.0);
        assert_eq!(evaluation.style_score, 0.0);
        assert!(values(evaluation.gradient).iter().all(|g| *g == 0.0));
    }

    #[test]
    fn rejects_mismatched_images() {
        let res = run_style_transfer(
            &extractor(),
            &NormalizationStats::IMAGENET,
            image(8),
            image(8),
            image(6),
            &config(1),
            &Default::default(),
        );

        match res {
            Err(Error::SizeMismatch(mismatch)) => {
                assert_eq!(mismatch.what, "initial");
                assert_eq!(mismatch.actual, [1, 3, 6, 6]);
            }
            _ => panic!("expected a size mismatch"),
        }
    }

    #[test]
    fn rejects_non_rgb_images() {
        let gray = Tensor::<Inner, 4>::zeros([1, 1, 8, 8], &Default::default());

        let res = run_style_transfer(
            &extractor(),
            &NormalizationStats::IMAGENET,
            gray.clone(),
            gray.clone(),
            gray,
            &config(1),
            &Default::default(),
        );
        assert!(matches!(res, Err(Error::InvalidShape([1, 1, 8, 8]))));
    }
}
