use neural_style as ns;
use ns::{
    burn::{
        backend::{Autodiff, NdArray},
        tensor::Tensor,
    },
    pipeline::build_pipeline,
    FeatureExtractor, Init, InputSize, Layout, NormalizationStats, Session, SessionBuilder,
};

type B = Autodiff<NdArray<f32>>;

const LAYOUT: &str = "conv4 relu conv4 relu maxpool conv8 relu conv8 relu maxpool";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn extractor() -> FeatureExtractor<B> {
    FeatureExtractor::new(LAYOUT.parse::<Layout>().unwrap(), &Default::default())
}

fn stripes(size: u32, period: u32) -> ns::image::DynamicImage {
    ns::image::DynamicImage::ImageRgb8(ns::image::RgbImage::from_fn(size, size, |x, y| {
        let on = (x / period + y / period) % 2 == 0;
        ns::image::Rgb(if on { [220, 40, 90] } else { [30, 200, 160] })
    }))
}

fn blobs(size: u32) -> ns::image::DynamicImage {
    ns::image::DynamicImage::ImageRgb8(ns::image::RgbImage::from_fn(size, size, |x, y| {
        let d = ((x as i32 - 8).pow(2) + (y as i32 - 8).pow(2)) as u32;
        ns::image::Rgb([(d % 256) as u8, (x * 13 % 256) as u8, (y * 7 % 256) as u8])
    }))
}

fn builder<'a>() -> SessionBuilder<'a> {
    Session::builder()
        .content(blobs(16))
        .style(stripes(16, 3))
        .input_size(InputSize::Original)
        .content_layers(vec!["conv_3"])
        .style_layers(vec!["conv_1", "conv_2", "conv_3"])
}

macro_rules! pipeline_len {
    ($name:ident, content: $content:expr, style: $style:expr, stages: $stages:expr) => {
        #[test]
        fn $name() {
            let device = Default::default();
            let image = || Tensor::<B, 4>::ones([1, 3, 8, 8], &device).mul_scalar(0.5);

            let content: &[&str] = &$content;
            let style: &[&str] = &$style;
            let content: Vec<String> = content.iter().map(|s| s.to_string()).collect();
            let style: Vec<String> = style.iter().map(|s| s.to_string()).collect();

            let built = build_pipeline(
                &extractor(),
                &NormalizationStats::IMAGENET,
                image(),
                image(),
                &content,
                &style,
                &device,
            )
            .unwrap();

            assert_eq!(built.content_probes.len(), content.len());
            assert_eq!(built.style_probes.len(), style.len());
            assert_eq!(built.pipeline.len(), $stages);

            let mut indices: Vec<_> = built
                .content_probes
                .iter()
                .chain(built.style_probes.iter())
                .map(|probe| probe.index())
                .collect();
            indices.sort_unstable();
            assert_eq!(indices.last().copied(), Some($stages - 1));
        }
    };
}

pipeline_len!(first_conv_only, content: ["conv_1"], style: [], stages: 3);
pipeline_len!(content_after_style, content: ["conv_2"], style: ["conv_1"], stages: 6);
pipeline_len!(style_on_pooling, content: [], style: ["pool_1"], stages: 7);
pipeline_len!(second_pool, content: ["pool_2"], style: [], stages: 12);
pipeline_len!(
    every_conv,
    content: ["relu_4"],
    style: ["conv_1", "conv_2", "conv_3", "conv_4"],
    stages: 15
);

#[test]
fn yields_every_iteration() {
    init_logger();

    let steps = builder()
        .iterations(6)
        .build(&extractor(), &Default::default())
        .unwrap()
        .steps();

    let mut last_iteration = 0;
    let mut last_image = None;
    let mut count = 0;
    for step in steps {
        assert!(step.iteration > last_iteration);
        last_iteration = step.iteration;
        last_image = Some(step.image);
        count += 1;
    }

    assert_eq!(count, 6);
    assert_eq!(last_iteration, 6);

    let pixels = last_image
        .unwrap()
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn optimization_lowers_the_loss() {
    init_logger();

    let losses: Vec<f64> = builder()
        .iterations(15)
        .style_weight(1e3)
        .build(&extractor(), &Default::default())
        .unwrap()
        .steps()
        .map(|step| step.loss)
        .collect();

    assert_eq!(losses.len(), 15);
    assert!(losses.iter().all(|loss| loss.is_finite()));
    assert!(losses[1..].iter().any(|loss| *loss < losses[0]), "{:?}", losses);
}

#[test]
fn runs_are_deterministic() {
    init_logger();
    let extractor = extractor();

    let run = || -> Vec<f64> {
        builder()
            .iterations(5)
            .build(&extractor, &Default::default())
            .unwrap()
            .steps()
            .map(|step| step.loss)
            .collect()
    };

    assert_eq!(run(), run());
}

#[test]
fn noise_depends_on_the_seed() {
    let extractor = extractor();
    let initial = |seed| {
        builder()
            .init(Init::Noise)
            .seed(seed)
            .build(&extractor, &Default::default())
            .unwrap()
            .steps()
            .image()
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    };

    assert_eq!(initial(9), initial(9));
    assert_ne!(initial(9), initial(10));
}

#[test]
fn matching_inputs_are_left_untouched() {
    init_logger();
    let img = blobs(128);

    let mut scores = Vec::new();
    let generated = Session::builder()
        .content(img.clone())
        .style(img.clone())
        .input_size(InputSize::Original)
        .content_layers(vec!["conv_4"])
        .style_layers(vec!["conv_1", "conv_2", "conv_3", "conv_4"])
        .iterations(3)
        .build(&extractor(), &Default::default())
        .unwrap()
        .run(Some(Box::new(move |update: ns::ProgressUpdate<'_>| {
            scores.push((update.content_score, update.style_score));
            for (content, style) in &scores {
                assert!(content.abs() < 1e-9);
                assert!(style.abs() < 1e-9);
            }
        })))
        .unwrap();

    let out: &ns::image::RgbImage = generated.as_ref();
    assert_eq!(out, &img.to_rgb8());
}

#[test]
fn generated_images_can_be_streamed() {
    let generated = builder()
        .iterations(1)
        .build(&extractor(), &Default::default())
        .unwrap()
        .run(None)
        .unwrap();

    let mut encoded = Vec::new();
    generated
        .write(&mut encoded, ns::image::ImageOutputFormat::Png)
        .unwrap();

    let decoded = ns::image::load_from_memory(&encoded).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 16));
}

#[test]
fn tensor_entry_point() {
    init_logger();
    let device = Default::default();

    let content = ns::image_to_tensor::<NdArray<f32>>(&blobs(16).to_rgb8(), &device);
    let style = ns::image_to_tensor::<NdArray<f32>>(&stripes(16, 4).to_rgb8(), &device);

    let config = ns::TransferConfig {
        iterations: 3,
        content_layers: vec!["conv_2".to_owned()],
        style_layers: vec!["conv_1".to_owned(), "relu_3".to_owned()],
        ..Default::default()
    };

    let mut steps = ns::run_style_transfer(
        &extractor(),
        &NormalizationStats::IMAGENET,
        content.clone(),
        style,
        content,
        &config,
        &device,
    )
    .unwrap();

    let first = steps.next().unwrap();
    assert_eq!(first.iteration, 1);
    assert!(first.style_score > 0.0);
    assert_eq!(first.content_score, 0.0);

    assert_eq!(steps.count(), 2);
}
