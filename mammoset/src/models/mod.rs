use dfdx::prelude::*;

mod loader;

pub use loader::{load_weights, load_weights_from};

/// Directory holding checkpoint files, addressed as `<name>.safetensors`.
pub const MODEL_DIR: &str = "model";

/// 3x3 convolution + batch normalization + ReLU.
pub type ConvBlock<const I: usize, const O: usize> = (Conv2D<I, O, 3, 1, 1>, BatchNorm2D<O>, ReLU);

/// Strided variant of [`ConvBlock`], halving the feature map.
pub type DownConvBlock<const I: usize, const O: usize> =
    (Conv2D<I, O, 3, 2, 1>, BatchNorm2D<O>, ReLU);

/// Fully-connected block: linear + batch normalization + ReLU + dropout
/// (rate 0.5).
pub type DenseBlock<const I: usize, const O: usize> =
    (Linear<I, O>, BatchNorm1D<O>, ReLU, DropoutOneIn<2>);

/// Classifier over 299x299 single-channel scans: four strided stages of
/// convolution blocks, a global average pool, then a dense head.
pub type MammoNet<const N: usize> = (
    (DownConvBlock<1, 32>, ConvBlock<32, 32>),
    (DownConvBlock<32, 64>, ConvBlock<64, 64>),
    (DownConvBlock<64, 128>, ConvBlock<128, 128>),
    (DownConvBlock<128, 128>, MaxPool2D<3, 2, 1>),
    (AvgPoolGlobal, DenseBlock<128, 1024>, Linear<1024, N>),
);
