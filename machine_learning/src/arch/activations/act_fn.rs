use ndarray::{ArrayBase, DataMut, Dimension};

/// The element-wise activations used by the supported architectures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Relu,
    /// `x * sigmoid(x)`, a.k.a. swish.
    Silu,
    /// The logistic function.
    Sigmoid,
}

impl ActFn {
    pub fn relu() -> Self {
        ActFn::Relu
    }

    pub fn silu() -> Self {
        ActFn::Silu
    }

    pub fn sigmoid() -> Self {
        ActFn::Sigmoid
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Relu => x.max(0.0),
            ActFn::Silu => x / (1. + (-x).exp()),
            ActFn::Sigmoid => 1. / (1. + (-x).exp()),
        }
    }

    /// Applies the activation in place over every element of `x`.
    pub fn apply<S, D>(&self, x: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        let act = *self;
        x.par_mapv_inplace(|v| act.f(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn known_values() {
        assert_eq!(ActFn::relu().f(-2.0), 0.0);
        assert_eq!(ActFn::relu().f(3.0), 3.0);
        assert!((ActFn::sigmoid().f(0.0) - 0.5).abs() < 1e-6);
        assert!((ActFn::sigmoid().f(2.0) - 0.880_797).abs() < 1e-6);
        assert!((ActFn::silu().f(1.0) - 0.731_058_6).abs() < 1e-6);
        assert_eq!(ActFn::silu().f(0.0), 0.0);
    }

    #[test]
    fn apply_is_elementwise() {
        let mut x = array![[-1.0, 0.5], [2.0, -0.1]];
        ActFn::relu().apply(&mut x);
        assert_eq!(x, array![[0.0, 0.5], [2.0, 0.0]]);
    }
}
