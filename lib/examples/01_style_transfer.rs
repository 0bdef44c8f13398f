use neural_style as ns;

type B = ns::burn::backend::Autodiff<ns::burn::backend::NdArray<f32>>;

fn main() -> Result<(), ns::Error> {
    // usage: 01_style_transfer <vgg19 weights> <content> <style>
    let args: Vec<String> = std::env::args().collect();
    let (weights, content, style) = match args.as_slice() {
        [_, weights, content, style] => (weights, content, style),
        _ => {
            eprintln!("usage: 01_style_transfer <vgg19 weights> <content> <style>");
            std::process::exit(1);
        }
    };

    let device = Default::default();

    // the extractor is shared by every session, so load it once
    let extractor = ns::FeatureExtractor::<B>::vgg19(&device).load_weights(weights, &device)?;

    let session = ns::Session::builder()
        .content(content)
        .style(style)
        // 300 iterations with a style weight of 1e6 are the defaults, but
        // fewer iterations are usually enough to see the effect
        .iterations(150)
        .build(&extractor, &device)?;

    let generated = session.run(None)?;

    // save the result to the disk
    generated.save("out/01.png")
}
