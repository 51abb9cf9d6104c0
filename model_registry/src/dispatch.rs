use std::panic::{self, AssertUnwindSafe};

use image::DynamicImage;
use log::warn;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};

use crate::{
    error::InferenceError, labels::LabelTable, model::LoadedModel,
    preprocess::PreprocessSelector, registry::ModelRegistry,
};

/// How many classes are reported per model.
pub const TOP_K: usize = 5;

/// The confidence reported by mocked predictions.
pub const MOCK_PROBABILITY: f64 = 92.1;

/// One ranked class of a model's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_id: usize,
    pub class_name: String,
    /// In percent, rounded to 2 decimals.
    pub probability: f64,
}

/// The ranked classes of every model, in registry order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predictions {
    entries: Vec<(String, Vec<Prediction>)>,
}

impl Predictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, predictions: Vec<Prediction>) {
        self.entries.push((name.into(), predictions));
    }

    pub fn get(&self, name: &str) -> Option<&[Prediction]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Prediction])> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Predictions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, predictions) in &self.entries {
            map.serialize_entry(name, predictions)?;
        }
        map.end()
    }
}

/// Runs `image` through every model of the registry.
///
/// A model whose preprocessing or forward pass fails (panics included) gets an empty list,
/// the other models are unaffected.
///
/// # Arguments
/// * `image` - The decoded image.
/// * `registry` - The loaded models.
/// * `selector` - The preprocessing of each model.
/// * `labels` - The class names.
/// * `k` - How many classes to keep per model.
pub fn predict(
    image: &DynamicImage,
    registry: &ModelRegistry,
    selector: &PreprocessSelector,
    labels: &LabelTable,
    k: usize,
) -> Predictions {
    let mut predictions = Predictions::new();

    for model in registry {
        let ranked = match classify(image, model, selector) {
            Ok(probabilities) => rank(probabilities.view(), labels, k),
            Err(e) => {
                warn!(model = model.name(); "inference failed: {e}");
                Vec::new()
            }
        };

        predictions.push(model.name(), ranked);
    }

    predictions
}

fn classify(
    image: &DynamicImage,
    model: &LoadedModel,
    selector: &PreprocessSelector,
) -> Result<Array1<f32>, InferenceError> {
    let x = selector.select(model.name()).apply(image)?;

    let logits = panic::catch_unwind(AssertUnwindSafe(|| model.classifier().logits(x.view())))
        .map_err(|_| InferenceError::Panicked)??;

    if logits.nrows() != 1 {
        return Err(InferenceError::UnexpectedBatch(logits.nrows()));
    }

    Ok(softmax(logits.row(0)))
}

/// A numerically stable softmax.
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// The indices of the `k` largest values, descending, lower indices first on ties.
pub fn top_k(values: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}

/// Percent rounded to 2 decimals.
fn to_percent(probability: f32) -> f64 {
    (probability as f64 * 100.0 * 100.0).round() / 100.0
}

/// Ranks the probabilities of one model and names each class.
///
/// Indices outside the label table get a placeholder name instead of failing.
pub fn rank(probabilities: ArrayView1<f32>, labels: &LabelTable, k: usize) -> Vec<Prediction> {
    top_k(probabilities, k)
        .into_iter()
        .map(|(class_id, probability)| {
            let class_name = match labels.name(class_id) {
                Some(name) => name.to_string(),
                None => {
                    warn!(
                        class_id = class_id,
                        labels = labels.len();
                        "predicted class is outside the label table"
                    );
                    format!("Unknown (class {class_id})")
                }
            };

            Prediction {
                class_id,
                class_name,
                probability: to_percent(probability),
            }
        })
        .collect()
}

/// The response served while no model is loaded: one confident guess per configured name.
pub fn mock_predictions<'a, I>(names: I, labels: &LabelTable) -> Predictions
where
    I: IntoIterator<Item = &'a str>,
{
    let class_name = format!("{} (Mock)", labels.name(0).unwrap_or("Unknown"));

    let mut predictions = Predictions::new();
    for name in names {
        predictions.push(
            name,
            vec![Prediction {
                class_id: 0,
                class_name: class_name.clone(),
                probability: MOCK_PROBABILITY,
            }],
        );
    }

    predictions
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(array![1000.0, 1000.0, 999.0].view());
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(p[0], p[1]);
        assert!(p[2] < p[0]);
    }

    #[test]
    fn ties_keep_the_lower_index_first() {
        let ranked = top_k(array![0.1, 0.3, 0.3, 0.05, 0.25].view(), 3);
        let ids: Vec<_> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids, [1, 2, 4]);
    }

    #[test]
    fn k_larger_than_classes_returns_them_all() {
        assert_eq!(top_k(array![0.5, 0.5].view(), 5).len(), 2);
    }

    #[test]
    fn out_of_bounds_classes_get_a_placeholder() {
        let labels = LabelTable::new(["cat", "dog"]);
        let ranked = rank(array![0.1, 0.2, 0.7].view(), &labels, 2);

        assert_eq!(ranked[0].class_id, 2);
        assert_eq!(ranked[0].class_name, "Unknown (class 2)");
        assert_eq!(ranked[0].probability, 70.0);
        assert_eq!(ranked[1].class_name, "dog");
    }

    #[test]
    fn mock_uses_the_first_label() {
        let mock = mock_predictions(["baseline", "distilled"], &LabelTable::cifar100());

        assert_eq!(mock.names().collect::<Vec<_>>(), ["baseline", "distilled"]);
        let entry = &mock.get("distilled").unwrap()[0];
        assert_eq!(entry.class_name, "Apple (Mock)");
        assert_eq!(entry.probability, MOCK_PROBABILITY);
    }

    #[test]
    fn serializes_as_an_ordered_object() {
        let mut predictions = Predictions::new();
        predictions.push("zeta", vec![]);
        let dog = Prediction {
            class_id: 1,
            class_name: "dog".into(),
            probability: 99.5,
        };
        predictions.push("alpha", vec![dog]);

        let json = serde_json::to_string(&predictions).unwrap();
        assert_eq!(
            json,
            r#"{"zeta":[],"alpha":[{"class_id":1,"class_name":"dog","probability":99.5}]}"#
        );
    }
}
