mod progress;

use structopt::StructOpt;

use progress::ProgressReporter;
use std::{num::NonZeroU32, path::PathBuf};
use neural_style::{
    burn::tensor::backend::Backend, image::ImageOutputFormat as ImgFmt, DefaultBackend, Dims,
    Error, FeatureExtractor, ImageSource, Init, InputSize, Session,
};

type Device = <DefaultBackend as Backend>::Device;

fn parse_size(input: &str) -> Result<InputSize, std::num::ParseIntError> {
    if input == "original" {
        return Ok(InputSize::Original);
    }

    let size = match input.split_once('x') {
        Some((width, height)) => InputSize::Exact(Dims::new(width.parse()?, height.parse()?)),
        None => InputSize::ShorterSide(input.parse()?),
    };

    Ok(size)
}

fn parse_img_fmt(input: &str) -> Result<ImgFmt, String> {
    let fmt = match input {
        "png" => ImgFmt::Png,
        "jpg" => ImgFmt::Jpeg(75),
        "bmp" => ImgFmt::Bmp,
        other => {
            return Err(format!(
                "image format `{}` not one of: 'png', 'jpg', 'bmp'",
                other
            ))
        }
    };

    Ok(fmt)
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Tweaks {
    /// How strongly the style loss is weighted. Style losses are tiny compared to
    /// content losses, so keep this several orders of magnitude above the content weight.
    #[structopt(long, default_value = "1000000")]
    style_weight: f64,
    /// How strongly the content loss is weighted
    #[structopt(long, default_value = "1")]
    content_weight: f64,
    /// Comma separated layers at which the content loss is measured, eg. `conv_4`
    #[structopt(long, use_delimiter = true)]
    content_layers: Vec<String>,
    /// Comma separated layers at which the style loss is measured, eg. `conv_1,conv_2`
    #[structopt(long, use_delimiter = true)]
    style_layers: Vec<String>,
    /// The image the optimization starts from: `content`, `noise`, or the path to an image
    #[structopt(long, default_value = "content")]
    init: String,
    /// A seed value for the white noise used by `--init noise`
    #[structopt(long)]
    seed: Option<u64>,
    /// Don't show a progress bar
    #[structopt(long)]
    no_progress: bool,
}

#[derive(StructOpt)]
#[structopt(
    name = "neural-style",
    about = "Repaints a content image in the style of another image",
    rename_all = "kebab-case"
)]
struct Opt {
    /// The image whose structure is kept
    #[structopt(long, parse(from_os_str))]
    content: PathBuf,
    /// The image whose textures and colors are transferred
    #[structopt(long, parse(from_os_str))]
    style: PathBuf,
    /// Size the inputs are resized to before optimizing. A single number sets the length
    /// of the shorter side, `width x height` an exact size, `original` keeps them as is.
    #[structopt(
        long,
        default_value = "128",
        parse(try_from_str = parse_size)
    )]
    size: InputSize,
    /// The number of optimizer iterations
    #[structopt(long, default_value = "300")]
    iterations: u32,
    /// Extractor weights in burn's record format, the `.mpk` extension is added automatically
    #[structopt(long, parse(from_os_str))]
    weights: Option<PathBuf>,
    /// A torchvision `vgg19` state dict to load the extractor weights from
    #[cfg(feature = "pytorch")]
    #[structopt(long, parse(from_os_str))]
    pytorch_weights: Option<PathBuf>,
    /// The format to save the generated image as.
    ///
    /// NOTE: this will only apply when stdout is specified via `-o -`, otherwise the image
    /// format is determined by the file extension of the path provided to `-o`
    #[structopt(
        long,
        default_value = "png",
        parse(try_from_str = parse_img_fmt)
    )]
    out_fmt: ImgFmt,
    /// The path to save the generated image to, the file extensions of the path determines
    /// the image format used. You may use `-` for stdout.
    #[structopt(long = "out", short, parse(from_os_str))]
    output_path: PathBuf,
    /// Saves the intermediate image every N iterations
    #[structopt(long)]
    save_every: Option<NonZeroU32>,
    /// The directory intermediate images are saved to
    #[structopt(long, default_value = "snapshots", parse(from_os_str))]
    snapshot_dir: PathBuf,
    #[structopt(flatten)]
    tweaks: Tweaks,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = real_main() {
        if atty::is(atty::Stream::Stderr) {
            eprintln!("\x1b[31merror\x1b[0m: {}", e);
        } else {
            eprintln!("error: {}", e);
        }

        std::process::exit(1);
    }
}

fn load_extractor(
    args: &Opt,
    device: &Device,
) -> Result<FeatureExtractor<DefaultBackend>, Error> {
    let extractor = FeatureExtractor::vgg19(device);

    #[cfg(feature = "pytorch")]
    {
        if let Some(ref path) = args.pytorch_weights {
            return extractor.load_pytorch_weights(path, device);
        }
    }

    match args.weights {
        Some(ref path) => extractor.load_weights(path, device),
        None => {
            log::warn!("no extractor weights specified, the output won't resemble either input");
            Ok(extractor)
        }
    }
}

fn real_main() -> Result<(), Error> {
    let args = Opt::from_args();

    // Check that the extension for the path supplied by the user is one of the ones we support
    {
        match args.output_path.extension().and_then(|ext| ext.to_str()) {
            Some("png") | Some("jpg") | Some("bmp") => {}
            None => {}
            Some(other) => return Err(Error::UnsupportedOutputFormat(other.to_owned())),
        }
    }

    let device = Device::default();
    let extractor = load_extractor(&args, &device)?;

    let init = match args.tweaks.init.as_str() {
        "content" => Init::Content,
        "noise" => Init::Noise,
        path => Init::Image(ImageSource::from_path(std::path::Path::new(path))),
    };

    let mut sb = Session::builder()
        .content(&args.content)
        .style(&args.style)
        .init(init)
        .input_size(args.size)
        .iterations(args.iterations)
        .seed(args.tweaks.seed.unwrap_or_default())
        .style_weight(args.tweaks.style_weight)
        .content_weight(args.tweaks.content_weight);

    if !args.tweaks.content_layers.is_empty() {
        sb = sb.content_layers(args.tweaks.content_layers.iter().cloned());
    }

    if !args.tweaks.style_layers.is_empty() {
        sb = sb.style_layers(args.tweaks.style_layers.iter().cloned());
    }

    let session = sb.build(&extractor, &device)?;

    let reporter = ProgressReporter::new(
        !args.tweaks.no_progress,
        args.save_every.map(|every| (every.get(), args.snapshot_dir.clone())),
    );

    let progress: Option<Box<dyn neural_style::GeneratorProgress>> = if reporter.is_active() {
        Some(Box::new(reporter))
    } else {
        None
    };

    let generated = session.run(progress)?;

    if args.output_path.to_str() == Some("-") {
        let out = std::io::stdout();
        let mut out = out.lock();
        generated.write(&mut out, args.out_fmt)?;
    } else {
        // The extension on the path wins over `--out-fmt`
        generated.save(&args.output_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("256").unwrap(), InputSize::ShorterSide(256));
        assert_eq!(
            parse_size("320x200").unwrap(),
            InputSize::Exact(Dims::new(320, 200))
        );
        assert_eq!(parse_size("original").unwrap(), InputSize::Original);
        assert!(parse_size("320x").is_err());
        assert!(parse_size("big").is_err());
    }

    #[test]
    fn parses_formats() {
        assert!(matches!(parse_img_fmt("jpg"), Ok(ImgFmt::Jpeg(75))));
        assert!(parse_img_fmt("gif").is_err());
    }

    #[test]
    fn parses_layer_lists() {
        let opt = Opt::from_iter(&[
            "neural-style",
            "--content",
            "a.jpg",
            "--style",
            "b.jpg",
            "-o",
            "out.png",
            "--style-layers",
            "conv_1,relu_2",
        ]);

        assert_eq!(opt.tweaks.style_layers, vec!["conv_1", "relu_2"]);
        assert!(opt.tweaks.content_layers.is_empty());
        assert_eq!(opt.size, InputSize::ShorterSide(128));
        assert_eq!(opt.iterations, 300);
    }
}
