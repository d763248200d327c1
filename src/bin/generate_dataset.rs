use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use hsi_patch_dataset::{generate_dataset, DatasetConfig, DatasetRequest, NpyDirectory};

#[derive(Parser, Debug)]
#[command(name = "generate_dataset", version)]
struct Args {
    /// Directory holding the cube and label map as .npy files
    #[arg(long, default_value = ".")]
    data_dir: String,

    /// Key of the (height, width, bands) cube inside data_dir
    #[arg(long, default_value = "Indian_pines_corrected")]
    cube_key: String,

    /// Key of the (height, width) label map inside data_dir
    #[arg(long, default_value = "Indian_pines_gt")]
    labels_key: String,

    /// Output directory for the train/test arrays
    #[arg(long, default_value = "trainingData")]
    output_dir: String,

    /// Number of whitened principal components
    #[arg(long, default_value = "30")]
    num_components: usize,

    /// Odd side length of the spatial window
    #[arg(long, default_value = "5")]
    window_size: usize,

    /// Fraction of labeled patches held out for testing
    #[arg(long, default_value = "0.25")]
    test_ratio: f64,

    /// Keep background (label 0) pixels as a class
    #[arg(long)]
    keep_zero_labels: bool,

    /// Scale each band to unit variance before fitting the projection
    #[arg(long)]
    standardize: bool,

    /// Patch the raw bands without the PCA reducer
    #[arg(long)]
    no_reduction: bool,

    /// Also write the fitted projection basis next to the arrays, committed with them
    #[arg(long)]
    save_basis: bool,

    #[arg(long, default_value = "345")]
    split_seed: u64,

    #[arg(long, default_value = "42")]
    balance_seed: u64,

    #[arg(long, default_value = "1337")]
    augment_seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    info!("Parsed command-line args: {:?}", args);

    let config = DatasetConfig {
        num_components: args.num_components,
        window_size: args.window_size,
        test_ratio: args.test_ratio,
        remove_zero_labels: !args.keep_zero_labels,
        apply_reduction: !args.no_reduction,
        standardize: args.standardize,
        split_seed: args.split_seed,
        balance_seed: args.balance_seed,
        augment_seed: args.augment_seed,
    };
    config.validate().context("Invalid configuration")?;

    let request = DatasetRequest {
        cube_key: args.cube_key.clone(),
        labels_key: args.labels_key.clone(),
        save_basis: args.save_basis,
    };
    let source = NpyDirectory::new(&args.data_dir);
    let mut sink = NpyDirectory::create(&args.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", args.output_dir))?;

    let prepared = generate_dataset(&source, &mut sink, &request, &config)
        .with_context(|| format!("Dataset generation from {:?} failed", args.data_dir))?;

    info!(
        "Done: train {:?} ({} augmented), test {:?}",
        prepared.train.data.dim(),
        prepared.augmentation.total(),
        prepared.test.data.dim()
    );
    Ok(())
}
