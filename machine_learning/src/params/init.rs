use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError, Uniform, uniform::Error as UniformError};

use super::ParamInit;
use crate::{MlErr, Result};

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::Init(value.to_string())
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::Init(value.to_string())
    }
}

/// Fills `dst` following the given initialization.
///
/// # Arguments
/// * `init` - The initialization scheme.
/// * `rng` - A random number generator.
/// * `dst` - The slice of the flat buffer to fill.
///
/// # Returns
/// An error if the scheme's distribution can't be built (e.g. a zero fan).
pub fn fill<R: Rng + ?Sized>(init: ParamInit, rng: &mut R, dst: &mut [f32]) -> Result<()> {
    match init {
        ParamInit::Zeros => dst.fill(0.0),
        ParamInit::Ones => dst.fill(1.0),
        ParamInit::KaimingNormal { fan_out } => {
            if fan_out == 0 {
                return Err(MlErr::Init("kaiming initialization needs fan_out > 0".into()));
            }

            let std_dev = (2. / fan_out as f32).sqrt();
            sample_into(&Normal::new(0., std_dev)?, rng, dst);
        }
        ParamInit::Uniform { bound } => {
            sample_into(&Uniform::new(-bound, bound)?, rng, dst);
        }
    }

    Ok(())
}

fn sample_into<D, R>(distribution: &D, rng: &mut R, dst: &mut [f32])
where
    D: Distribution<f32>,
    R: Rng + ?Sized,
{
    dst.iter_mut()
        .for_each(|x| *x = distribution.sample(&mut *rng));
}
