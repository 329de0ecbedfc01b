use std::path::Path;

use ::safetensors::SafeTensors;
use dfdx::{
    nn::tensor_collection::{RecursiveWalker, TensorCollection},
    prelude::*,
    tensor::safetensors::SafeDtype,
};
use num_traits::NumCast;

use super::MODEL_DIR;
use crate::error::Error;

/// Restores tensors positionally from a safetensors file, with TF-style
/// include/exclude filtering on the stored names. A skipped tensor keeps
/// its current values but still consumes its name slot.
struct NamedTensorVisitor<'a> {
    names: Vec<String>,
    idx: usize,
    include: &'a [&'a str],
    exclude: &'a [&'a str],
    tensors: &'a SafeTensors<'a>,
}

impl<'a> NamedTensorVisitor<'a> {
    fn new(
        names: Vec<String>,
        include: &'a [&'a str],
        exclude: &'a [&'a str],
        tensors: &'a SafeTensors<'a>,
    ) -> Self {
        Self {
            names,
            idx: 0,
            include,
            exclude,
            tensors,
        }
    }

    fn wanted(&self, name: &str) -> bool {
        if self.exclude.iter().any(|e| name.starts_with(e)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|i| name.starts_with(i))
    }
}

// Scalars are stored as a single little-endian f64.
fn scalar_from_le_bytes(data: &[u8]) -> Result<f64, Error> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| Error::NumberFormatException)?;
    Ok(f64::from_le_bytes(bytes))
}

impl<'a, E: Dtype + SafeDtype, D: Device<E>> TensorVisitor<E, D> for NamedTensorVisitor<'a> {
    type Viewer = ViewTensorMut;

    type Err = Error;

    type E2 = E;

    type D2 = D;

    fn visit<S: Shape>(
        &mut self,
        _opts: TensorOptions<S, E, D>,
        t: <Self::Viewer as TensorViewer>::View<'_, Tensor<S, E, D>>,
    ) -> Result<Option<Tensor<S, Self::E2, Self::D2>>, Self::Err> {
        let name = self.names.get(self.idx).ok_or(Error::NotEnoughNames)?;
        if self.wanted(name) {
            log::debug!("Loading tensor shape: {:?}, {:?}", t.shape(), name);
            t.load_safetensor(self.tensors, name)?;
        } else {
            log::debug!("Skipping tensor {:?}", name);
        }
        self.idx += 1;
        Ok(None)
    }

    fn visit_scalar<N: NumCast>(
        &mut self,
        _opts: ScalarOptions<N>,
        n: <Self::Viewer as TensorViewer>::View<'_, N>,
    ) -> Result<Option<N>, Self::Err> {
        let name = self.names.get(self.idx).ok_or(Error::NotEnoughNames)?;
        if self.wanted(name) {
            log::debug!("Loading scalar: {:?}", name);
            let tensor = self.tensors.tensor(name)?;
            let val = scalar_from_le_bytes(tensor.data())?;
            *n = N::from(val).ok_or(Error::NumberFormatException)?;
        }
        self.idx += 1;
        Ok(None)
    }
}

/// Restore model variables from `model/<name>.safetensors`. `names` maps
/// the model's tensors, in traversal order, to the names stored in the
/// file; `include`/`exclude` filter by name prefix the way checkpoint
/// restoration traditionally does.
pub fn load_weights<M, E, D>(
    model: &mut M,
    name: &str,
    names: Vec<String>,
    include: &[&str],
    exclude: &[&str],
) -> Result<(), Error>
where
    E: Dtype + SafeDtype,
    D: Device<E>,
    M: TensorCollection<E, D>,
{
    let model_path = Path::new(MODEL_DIR).join(format!("{name}.safetensors"));
    load_weights_from(model, &model_path, names, include, exclude)
}

pub fn load_weights_from<M, E, D>(
    model: &mut M,
    path: &Path,
    names: Vec<String>,
    include: &[&str],
    exclude: &[&str],
) -> Result<(), Error>
where
    E: Dtype + SafeDtype,
    D: Device<E>,
    M: TensorCollection<E, D>,
{
    log::info!("Restoring weights from {}", path.display());
    let bytes = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut visitor = NamedTensorVisitor::new(names, include, exclude, &tensors);
    M::iter_tensors(&mut RecursiveWalker {
        m: model,
        f: &mut visitor,
    })?;
    Ok(())
}
