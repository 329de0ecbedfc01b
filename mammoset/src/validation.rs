use std::{
    fs::File,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array4, Axis};
use ndarray_npy::ReadNpyExt;
use rand::seq::SliceRandom;

use crate::{
    download::{Dataset, DATA_DIR},
    error::Error,
};

/// Which cached split of a dataset to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Validation,
    Test,
    Mias,
}

impl Split {
    fn name(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Test => "test",
            Self::Mias => "mias",
        }
    }
}

/// How raw label codes are re-encoded before training or evaluation.
///
/// The raw codes are 0 = negative, 1 = benign calcification, 2 = benign
/// mass, 3 = malignant calcification, 4 = malignant mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Keep the raw five-class codes.
    Label,
    /// Binary: 0 stays 0, everything abnormal becomes 1.
    Normal,
    /// Three classes by lesion type: calcification vs mass.
    Mass,
    /// Three classes by pathology: benign vs malignant.
    Benign,
}

impl LabelKind {
    pub fn remap_code(self, code: i64) -> i64 {
        match self {
            Self::Label => code,
            Self::Normal => (code != 0) as i64,
            Self::Mass => match code {
                1 | 3 => 1,
                2 | 4 => 2,
                _ => 0,
            },
            Self::Benign => match code {
                1 | 2 => 1,
                3 | 4 => 2,
                _ => 0,
            },
        }
    }

    pub fn remap(self, labels: &Array1<i64>) -> Array1<i64> {
        labels.mapv(|code| self.remap_code(code))
    }
}

impl std::str::FromStr for LabelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "label" => Ok(Self::Label),
            "normal" => Ok(Self::Normal),
            "mass" => Ok(Self::Mass),
            "benign" => Ok(Self::Benign),
            other => Err(format!("unknown label kind '{other}'")),
        }
    }
}

fn split_files(
    dataset: Dataset,
    split: Split,
    data_dir: &Path,
) -> Result<(PathBuf, PathBuf), Error> {
    let n = dataset.id();
    match split {
        Split::Validation | Split::Test => {
            if dataset == Dataset::Mias {
                return Err(Error::NoSuchDataset {
                    dataset: n,
                    split: split.name(),
                });
            }
            let prefix = if split == Split::Validation { "cv" } else { "test" };
            Ok((
                data_dir.join(format!("{prefix}{n}_data.npy")),
                data_dir.join(format!("{prefix}{n}_labels.npy")),
            ))
        }
        // The MIAS slices re-cut for dataset 9 live under their own names;
        // every other dataset evaluates against the common MIAS images.
        Split::Mias => {
            if dataset == Dataset::Ddsm9 {
                Ok((
                    data_dir.join("all_mias_slices9.npy"),
                    data_dir.join("all_mias_labels9.npy"),
                ))
            } else {
                Ok((
                    data_dir.join("mias_test_images.npy"),
                    data_dir.join("mias_test_labels_enc.npy"),
                ))
            }
        }
    }
}

/// Load the cached image/label arrays for a validation, test or MIAS split,
/// re-encode the labels per `how`, and shuffle images and labels under one
/// shared permutation.
pub fn load_validation_data(
    dataset: Dataset,
    split: Split,
    how: LabelKind,
) -> Result<(Array4<f32>, Array1<i64>), Error> {
    load_validation_data_from(dataset, split, how, Path::new(DATA_DIR))
}

pub fn load_validation_data_from(
    dataset: Dataset,
    split: Split,
    how: LabelKind,
    data_dir: &Path,
) -> Result<(Array4<f32>, Array1<i64>), Error> {
    let (data_path, labels_path) = split_files(dataset, split, data_dir)?;
    log::info!(
        "Loading {} split of dataset {} from {}",
        split.name(),
        dataset.id(),
        data_path.display()
    );

    let images = Array4::<f32>::read_npy(File::open(&data_path)?)?;
    let labels = Array1::<i64>::read_npy(File::open(&labels_path)?)?;
    let labels = how.remap(&labels);

    // One permutation applied to both arrays; shuffling them independently
    // would destroy the image/label pairing.
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.shuffle(&mut rand::thread_rng());
    let images = images.select(Axis(0), &order);
    let labels = labels.select(Axis(0), &order);

    Ok((images, labels))
}
