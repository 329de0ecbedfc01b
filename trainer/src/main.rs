use clap::Parser;
use color_eyre::eyre::{Context, Result};
use mammoset::{
    prelude::*,
    records::{ExampleDecoder, LabelField, RecordReader},
};

/// Fetch a mammography dataset and walk its splits, as a smoke test of the
/// data pipeline feeding the training graph.
#[derive(Parser)]
struct Args {
    /// Dataset identifier (0, 4, 5, 6, 8 or 9).
    #[arg(long, default_value_t = 5)]
    dataset: u8,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Randomly flip training batches along the width axis.
    #[arg(long)]
    distort: bool,

    /// Label encoding: label, normal, mass or benign.
    #[arg(long, default_value = "normal")]
    how: LabelKind,

    /// Also scan the training record files and count their examples.
    #[arg(long)]
    scan_records: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .init();
    color_eyre::install()?;
    let args = Args::parse();

    let dataset = Dataset::from_id(args.dataset)
        .ok_or_else(|| color_eyre::eyre::eyre!("unknown dataset id {}", args.dataset))?;

    download_data(dataset);

    let (images, labels) = load_validation_data(dataset, Split::Validation, args.how)
        .context("loading validation data")?;
    log::info!(
        "validation split: {:?} images, {} labels",
        images.shape(),
        labels.len()
    );

    let mut batches = 0;
    for batch in Batches::new(&images, &labels, args.batch_size).distort(args.distort) {
        batches += 1;
        log::debug!("batch {}: {:?}", batches, batch.images.shape());
    }
    log::info!("iterated {} validation batches", batches);

    log::info!(
        "training records expected for dataset {}: {}",
        dataset.id(),
        dataset.total_records()
    );
    if args.scan_records {
        let files = dataset.training_files(std::path::Path::new(mammoset::download::DATA_DIR));
        let decoder = ExampleDecoder::new(LabelField::Normal);
        let mut count = 0usize;
        for example in RecordReader::open(files).examples(decoder) {
            example.context("decoding training record")?;
            count += 1;
        }
        log::info!("training records found: {}", count);
    }

    Ok(())
}
