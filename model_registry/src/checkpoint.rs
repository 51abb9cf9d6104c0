use std::{fs, mem, path::Path};

use bytemuck::Pod;
use half::{bf16, f16};
use log::debug;
use machine_learning::StateDict;
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::error::CheckpointError;

/// Prefixes of checkpoints that nest the weights inside a bigger training state.
pub const NESTED_PREFIXES: [&str; 2] = ["model_state_dict.", "state_dict."];

type Result<T> = std::result::Result<T, CheckpointError>;

/// Reads a safetensors checkpoint, unwrapping nested weights.
pub fn read_state_dict(path: impl AsRef<Path>) -> Result<StateDict> {
    let bytes = fs::read(path)?;
    parse_state_dict(&bytes)
}

/// Parses an in-memory safetensors checkpoint, unwrapping nested weights.
///
/// Every tensor is converted to `f32`, integer tensors (batch counters) included.
pub fn parse_state_dict(bytes: &[u8]) -> Result<StateDict> {
    let tensors = SafeTensors::deserialize(bytes)?;

    let mut state = tensors
        .tensors()
        .into_iter()
        .map(|(key, view)| -> Result<(String, ArrayD<f32>)> {
            let tensor = to_array(&key, &view)?;
            Ok((key, tensor))
        })
        .collect::<Result<StateDict>>()?;

    if let Some(prefix) = unwrap_nested(&mut state) {
        debug!(prefix = prefix; "unwrapped nested state dict");
    }

    Ok(state)
}

/// Strips the first of `NESTED_PREFIXES` every key carries.
///
/// # Returns
/// The stripped prefix, if any.
pub fn unwrap_nested(state: &mut StateDict) -> Option<&'static str> {
    NESTED_PREFIXES
        .into_iter()
        .find(|prefix| state.strip_prefix(prefix))
}

fn decode<T: Pod>(data: &[u8]) -> impl Iterator<Item = T> + '_ {
    data.chunks_exact(mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
}

fn to_array(key: &str, view: &TensorView<'_>) -> Result<ArrayD<f32>> {
    let data = view.data();
    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => decode::<f32>(data).collect(),
        Dtype::F64 => decode::<f64>(data).map(|v| v as f32).collect(),
        Dtype::F16 => decode::<f16>(data).map(f16::to_f32).collect(),
        Dtype::BF16 => decode::<bf16>(data).map(bf16::to_f32).collect(),
        Dtype::I64 => decode::<i64>(data).map(|v| v as f32).collect(),
        other => {
            return Err(CheckpointError::UnsupportedDtype {
                key: key.to_string(),
                dtype: format!("{other:?}"),
            });
        }
    };

    Ok(ArrayD::from_shape_vec(IxDyn(view.shape()), values)?)
}

/// Serializes `state` as a safetensors buffer of `f32` tensors.
pub fn serialize_state_dict(state: &StateDict) -> Result<Vec<u8>> {
    let buffers: Vec<(&String, Vec<usize>, Vec<u8>)> = state
        .iter()
        .map(|(key, tensor)| {
            let values: Vec<f32> = tensor.iter().copied().collect();
            let bytes = bytemuck::cast_slice(&values).to_vec();
            (key, tensor.shape().to_vec(), bytes)
        })
        .collect();

    let views = buffers
        .iter()
        .map(|(key, shape, bytes)| -> Result<(&str, TensorView<'_>)> {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytes)?;
            Ok((key.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(safetensors::serialize(views.iter().map(|(k, v)| (*k, v)), &None)?)
}

/// Writes `state` to `path` as a safetensors checkpoint.
pub fn write_state_dict(state: &StateDict, path: impl AsRef<Path>) -> Result<()> {
    let bytes = serialize_state_dict(state)?;
    fs::write(path, bytes)?;
    Ok(())
}
