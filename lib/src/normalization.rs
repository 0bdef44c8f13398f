use burn::tensor::{backend::Backend, Tensor};

/// Per-channel statistics of the data a feature extractor was trained on.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NormalizationStats {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl NormalizationStats {
    /// The statistics of the ImageNet training set, used by torchvision's
    /// pretrained models
    pub const IMAGENET: Self = Self {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };
}

impl Default for NormalizationStats {
    fn default() -> Self {
        Self::IMAGENET
    }
}

/// Computes `(image - mean) / std` per channel, broadcast over the spatial
/// dimensions.
#[derive(Clone, Debug)]
pub struct Normalization<B: Backend> {
    mean: Tensor<B, 4>,
    std: Tensor<B, 4>,
}

impl<B: Backend> Normalization<B> {
    pub fn new(stats: &NormalizationStats, device: &B::Device) -> Self {
        Self {
            mean: Tensor::<B, 1>::from_floats(stats.mean, device).reshape([1, 3, 1, 1]),
            std: Tensor::<B, 1>::from_floats(stats.std, device).reshape([1, 3, 1, 1]),
        }
    }

    pub fn forward(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        (image - self.mean.clone()) / self.std.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    type B = NdArray<f32>;

    #[test]
    fn normalizes_each_channel() {
        let device = Default::default();
        let stats = NormalizationStats {
            mean: [0.5, 0.0, 1.0],
            std: [0.5, 2.0, 0.25],
        };

        let image = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 0.5, 2.0, 4.0, 1.0, 1.5], [1, 3, 1, 2]),
            &device,
        );
        let out = Normalization::new(&stats, &device)
            .forward(image)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(out, vec![1.0, 0.0, 1.0, 2.0, 0.0, 2.0]);
    }

    #[test]
    fn imagenet_is_default() {
        assert_eq!(NormalizationStats::default(), NormalizationStats::IMAGENET);
    }
}
