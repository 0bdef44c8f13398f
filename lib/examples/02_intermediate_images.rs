use neural_style as ns;

type B = ns::burn::backend::Autodiff<ns::burn::backend::NdArray<f32>>;

fn main() -> Result<(), ns::Error> {
    // usage: 02_intermediate_images <vgg19 weights> <content> <style>
    let args: Vec<String> = std::env::args().collect();
    let (weights, content, style) = match args.as_slice() {
        [_, weights, content, style] => (weights, content, style),
        _ => {
            eprintln!("usage: 02_intermediate_images <vgg19 weights> <content> <style>");
            std::process::exit(1);
        }
    };

    let device = Default::default();
    let extractor = ns::FeatureExtractor::<B>::vgg19(&device).load_weights(weights, &device)?;

    // start from noise rather than the content image, and only match the
    // style at the first three convolutions
    let steps = ns::Session::builder()
        .content(content)
        .style(style)
        .init(ns::Init::Noise)
        .seed(42)
        .style_layers(vec!["conv_1", "conv_2", "conv_3"])
        .iterations(200)
        .build(&extractor, &device)?
        .steps();

    std::fs::create_dir_all("out/02")?;

    for step in steps {
        println!(
            "{:>3}: content {:.4} style {:.4}",
            step.iteration, step.content_score, step.style_score
        );

        if step.iteration % 25 == 0 {
            ns::tensor_to_image(step.image)?.save(format!("out/02/{:03}.png", step.iteration))?;
        }
    }

    Ok(())
}
