pub use crate::augment::{augment, normalize_images, scale_input, AugmentOptions};
pub use crate::batch::{Batch, Batches};
pub use crate::download::{download_data, download_file, unzip, Dataset};
pub use crate::error::Error;
pub use crate::models::{load_weights, ConvBlock, DenseBlock, MammoNet};
pub use crate::records::{ExampleDecoder, LabelField, RecordReader, RecordWriter};
pub use crate::util::{flatten, Nested};
pub use crate::validation::{load_validation_data, LabelKind, Split};
