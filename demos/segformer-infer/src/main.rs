#![recursion_limit = "256"]

use burn::backend::NdArray;
use burn::prelude::Tensor;
use burn::tensor::Distribution;
use clap::Parser;
use segformer::models::segformer::{SegFormerConfig, SegFormerMeta};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "SegFormer forward pass on random pixels", long_about = None)]
struct Args {
    #[arg(
        long,
        default_value = "mit_b0",
        help = "Model variant: mit_b0..mit_b5, b0..b5 or segformer_b0..segformer_b5."
    )]
    variant: String,

    #[arg(long, default_value_t = 512, help = "Input height.")]
    height: usize,

    #[arg(long, default_value_t = 512, help = "Input width.")]
    width: usize,

    #[arg(long, default_value_t = 3, help = "Input channels.")]
    channels: usize,

    #[arg(long, default_value_t = 19, help = "Number of output classes.")]
    num_classes: usize,

    #[arg(long, default_value_t = 1, help = "Batch size.")]
    batch: usize,
}

fn main() -> anyhow::Result<()> {
    type B = NdArray;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let device = Default::default();

    let config = SegFormerConfig::for_variant_name(
        &args.variant,
        &[args.height, args.width, args.channels],
        args.num_classes,
    )?;
    let plan = config.validate()?;
    tracing::info!(
        variant = %args.variant,
        stage_resolutions = ?plan.encoder.stage_resolutions(),
        head_resolution = ?plan.head_resolution,
        "validated config"
    );

    let model = config.try_init::<B>(&device)?;
    println!(
        "{}: embed_dims={:?} depths={:?} decode_dim={}",
        args.variant,
        model.embed_dims(),
        model.depths(),
        model.decode_dim()
    );

    let pixels = Tensor::<B, 4>::random(
        [args.batch, args.height, args.width, args.channels],
        Distribution::Default,
        &device,
    );

    let start = std::time::Instant::now();
    let probs = model.forward(pixels);
    let elapsed = start.elapsed();

    let dims = probs.dims();
    let max_sum_error: f32 = probs
        .sum_dim(3)
        .sub_scalar(1.0)
        .abs()
        .max()
        .into_scalar();

    println!("output shape: {dims:?}");
    println!("max |sum(p) - 1|: {max_sum_error:e}");
    println!("forward: {elapsed:?}");

    Ok(())
}
