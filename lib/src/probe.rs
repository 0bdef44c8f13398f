//! Pass-through pipeline stages that record a loss against a frozen target.

use crate::gram::gram_matrix;
use burn::tensor::{backend::Backend, Tensor};

/// A stage that passes its input through untouched while recording a scalar
/// loss as a side effect.
pub trait LossProbe<B: Backend> {
    /// Records the loss of `input` against the frozen target and returns
    /// `input` unchanged.
    ///
    /// # Panics
    ///
    /// If `input` doesn't have the shape of the features the probe was
    /// built from.
    fn forward(&mut self, input: Tensor<B, 4>) -> Tensor<B, 4>;

    /// The loss computed by the most recent `forward`, if any
    fn loss(&self) -> Option<Tensor<B, 1>>;
}

/// Mean squared error between two tensors of the same shape
fn mse<B: Backend, const D: usize>(input: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
    (input - target).powf_scalar(2.0).mean()
}

/// Compares activations directly against the activations of the content
/// image.
#[derive(Clone, Debug)]
pub struct ContentProbe<B: Backend> {
    target: Tensor<B, 4>,
    loss: Option<Tensor<B, 1>>,
}

impl<B: Backend> ContentProbe<B> {
    pub fn new(target: Tensor<B, 4>) -> Self {
        Self {
            target: target.detach(),
            loss: None,
        }
    }

    pub fn target(&self) -> &Tensor<B, 4> {
        &self.target
    }
}

impl<B: Backend> LossProbe<B> for ContentProbe<B> {
    fn forward(&mut self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        assert_eq!(
            input.dims(),
            self.target.dims(),
            "content probe input doesn't match its target"
        );

        self.loss = Some(mse(input.clone(), self.target.clone()));
        input
    }

    fn loss(&self) -> Option<Tensor<B, 1>> {
        self.loss.clone()
    }
}

/// Compares the Gram matrix of the activations against the Gram matrix of
/// the style image's activations.
#[derive(Clone, Debug)]
pub struct StyleProbe<B: Backend> {
    target: Tensor<B, 2>,
    loss: Option<Tensor<B, 1>>,
}

impl<B: Backend> StyleProbe<B> {
    /// Creates a probe from the style image's feature map
    pub fn new(features: Tensor<B, 4>) -> Self {
        Self::from_gram(gram_matrix(features.detach()))
    }

    /// Creates a probe from an already computed Gram matrix
    pub fn from_gram(target: Tensor<B, 2>) -> Self {
        Self {
            target: target.detach(),
            loss: None,
        }
    }

    pub fn target(&self) -> &Tensor<B, 2> {
        &self.target
    }
}

impl<B: Backend> LossProbe<B> for StyleProbe<B> {
    fn forward(&mut self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let gram = gram_matrix(input.clone());
        assert_eq!(
            gram.dims(),
            self.target.dims(),
            "style probe input doesn't match its target"
        );

        self.loss = Some(mse(gram, self.target.clone()));
        input
    }

    fn loss(&self) -> Option<Tensor<B, 1>> {
        self.loss.clone()
    }
}
