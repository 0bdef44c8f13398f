use burn::tensor::{backend::Backend, Tensor};

/// Computes the Gram matrix of a `[batch, channels, height, width]` feature
/// map: the inner products between every pair of flattened channels, divided
/// by the total number of elements so that feature maps of different spatial
/// sizes produce losses on a comparable scale.
pub fn gram_matrix<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, height, width] = features.dims();
    let numel = batch * channels * height * width;

    let flat = features.reshape([batch * channels, height * width]);
    flat.clone()
        .matmul(flat.transpose())
        .div_scalar(numel as f32)
}

#[cfg(test)]
mod test {
    use super::*;
    use burn::{
        backend::NdArray,
        tensor::{Distribution, TensorData},
    };

    type B = NdArray<f32>;

    #[test]
    fn known_values() {
        // channel 0 = [1, 2], channel 1 = [3, 4]
        let features = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &Default::default(),
        );

        let gram = gram_matrix(features);
        assert_eq!(gram.dims(), [2, 2]);

        let values = gram.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![5.0 / 4.0, 11.0 / 4.0, 11.0 / 4.0, 25.0 / 4.0]);
    }

    #[test]
    fn is_symmetric() {
        let features =
            Tensor::<B, 4>::random([1, 6, 5, 7], Distribution::Default, &Default::default());

        let gram = gram_matrix(features);
        let transposed = gram.clone().transpose();

        let a = gram.into_data().to_vec::<f32>().unwrap();
        let b = transposed.into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= 1e-6, "{} != {}", x, y);
        }
    }

    #[test]
    fn independent_of_spatial_arrangement() {
        let device = Default::default();
        let a = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 2, 1, 3]),
            &device,
        );
        // same pixels, shuffled positions
        let b = Tensor::<B, 4>::from_data(
            TensorData::new(vec![3.0f32, 1.0, 2.0, 6.0, 4.0, 5.0], [1, 2, 3, 1]),
            &device,
        );

        let a = gram_matrix(a).into_data().to_vec::<f32>().unwrap();
        let b = gram_matrix(b).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
