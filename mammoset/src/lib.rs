pub mod augment;
pub mod batch;
pub mod download;
pub mod error;
pub mod models;
pub mod prelude;
pub mod records;
pub mod util;
pub mod validation;

pub use self::{
    batch::{Batch, Batches},
    download::{download_data, Dataset},
    error::Error,
    validation::{load_validation_data, LabelKind, Split},
};
