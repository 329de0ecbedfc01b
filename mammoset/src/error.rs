#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("npy read error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("protobuf decode error: {0}")]
    Proto(#[from] prost::DecodeError),

    #[error("no files defined for dataset {dataset} split '{split}'")]
    NoSuchDataset { dataset: u8, split: &'static str },

    #[error("record corrupt: {0}")]
    RecordCorrupt(&'static str),

    #[error("record feature missing or mistyped: {0}")]
    MissingFeature(String),

    #[error("image blob has {got} bytes, expected {want}")]
    ImageSize { got: usize, want: usize },

    #[error("error with safetensors file: {0:?}")]
    Safetensors(dfdx::tensor::safetensors::Error),

    #[error("not enough tensor names")]
    NotEnoughNames,

    #[error("error converting number formats")]
    NumberFormatException,
}

impl From<dfdx::tensor::safetensors::Error> for Error {
    fn from(value: dfdx::tensor::safetensors::Error) -> Self {
        Self::Safetensors(value)
    }
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Safetensors(dfdx::tensor::safetensors::Error::SafeTensorError(value))
    }
}
