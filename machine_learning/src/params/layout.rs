use std::ops::Range;

/// How a parameter is filled when a fresh network shell is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamInit {
    Zeros,
    Ones,
    /// Normal with `std = sqrt(2 / fan_out)`, used for convolutions.
    KaimingNormal { fan_out: usize },
    /// Uniform in `[-bound, bound)`.
    Uniform { bound: f32 },
}

/// A named tensor living inside the flat parameter buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
    pub init: ParamInit,
}

impl ParamSpec {
    /// The amount of scalars this parameter holds.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Maps a flat parameter buffer into named tensors.
///
/// Layers register their tensors while being constructed and keep only the returned ranges,
/// the values themselves live in a single `Vec<f32>` owned by the network.
#[derive(Debug, Clone, Default)]
pub struct ParamLayout {
    specs: Vec<ParamSpec>,
    size: usize,
}

impl ParamLayout {
    /// Creates a new empty `ParamLayout`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new tensor at the end of the buffer.
    ///
    /// # Arguments
    /// * `name` - The fully qualified parameter name (e.g. `features.0.0.weight`).
    /// * `shape` - The tensor's shape, an empty shape is a scalar.
    /// * `init` - How to fill it when building a fresh shell.
    ///
    /// # Returns
    /// The range of the flat buffer the tensor occupies.
    pub fn push(&mut self, name: impl Into<String>, shape: &[usize], init: ParamInit) -> Range<usize> {
        let len: usize = shape.iter().product();
        let range = self.size..self.size + len;
        self.size += len;

        self.specs.push(ParamSpec {
            name: name.into(),
            shape: shape.to_vec(),
            range: range.clone(),
            init,
        });

        range
    }

    /// Returns the total amount of scalars in the buffer.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }
}

/// Joins a module prefix and a parameter name the way state dicts do.
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_contiguous_and_non_overlapping() {
        let mut layout = ParamLayout::new();
        let w = layout.push("fc.weight", &[3, 4], ParamInit::Uniform { bound: 0.5 });
        let b = layout.push("fc.bias", &[3], ParamInit::Zeros);
        let n = layout.push("bn.num_batches_tracked", &[], ParamInit::Zeros);

        assert_eq!(w, 0..12);
        assert_eq!(b, 12..15);
        assert_eq!(n, 15..16);
        assert_eq!(layout.size(), 16);
        assert_eq!(layout.get("fc.bias").map(|s| s.shape.clone()), Some(vec![3]));
        assert!(layout.get("fc.missing").is_none());
    }

    #[test]
    fn join_key_skips_empty_prefix() {
        assert_eq!(join_key("", "fc"), "fc");
        assert_eq!(join_key("layer1.0", "conv1"), "layer1.0.conv1");
    }
}
