use std::{fs, io, path::Path};

const CIFAR100: [&str; 100] = [
    "apple", "aquarium_fish", "baby", "bear", "beaver", "bed", "bee", "beetle", "bicycle",
    "bottle", "bowl", "boy", "bridge", "bus", "butterfly", "camel", "can", "castle",
    "caterpillar", "cattle", "chair", "chimpanzee", "clock", "cloud", "cockroach", "couch",
    "crab", "crocodile", "cup", "dinosaur", "dolphin", "elephant", "flatfish", "forest", "fox",
    "girl", "hamster", "house", "kangaroo", "keyboard", "lamp", "lawn_mower", "leopard", "lion",
    "lizard", "lobster", "man", "maple_tree", "motorcycle", "mountain", "mouse", "mushroom",
    "oak_tree", "orange", "orchid", "otter", "palm_tree", "pear", "pickup_truck", "pine_tree",
    "plain", "plate", "poppy", "porcupine", "possum", "rabbit", "raccoon", "ray", "road",
    "rocket", "rose", "sea", "seal", "shark", "shrew", "skunk", "skyscraper", "snail", "snake",
    "spider", "squirrel", "streetcar", "sunflower", "sweet_pepper", "table", "tank", "telephone",
    "television", "tiger", "tractor", "train", "trout", "tulip", "turtle", "wardrobe", "whale",
    "willow_tree", "wolf", "woman", "worm",
];

/// The ordered class names a classifier's outputs map to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    /// Creates a new `LabelTable` keeping the names as given.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The 100 CIFAR-100 classes, humanized (`aquarium_fish` becomes `Aquarium Fish`).
    pub fn cifar100() -> Self {
        Self::new(CIFAR100.iter().map(|name| humanize(name)))
    }

    /// Reads a table with one class per line, blank lines are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let names = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());

        Ok(Self::new(names))
    }

    /// The name of class `i`, `None` when the index is out of bounds.
    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::cifar100()
    }
}

/// Turns `snake_case` into `Title Case`.
pub fn humanize(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cifar_names_are_humanized() {
        let labels = LabelTable::cifar100();

        assert_eq!(labels.len(), 100);
        assert_eq!(labels.name(0), Some("Apple"));
        assert_eq!(labels.name(1), Some("Aquarium Fish"));
        assert_eq!(labels.name(99), Some("Worm"));
        assert_eq!(labels.name(100), None);
    }

    #[test]
    fn raw_tables_are_kept_verbatim() {
        let labels = LabelTable::new(["cat", "dog", "bird"]);
        assert_eq!(labels.iter().collect::<Vec<_>>(), ["cat", "dog", "bird"]);
        assert_eq!(humanize("sweet_pepper"), "Sweet Pepper");
    }

    #[test]
    fn reads_one_label_per_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "goldfish\n  great white shark \n\ntree frog").unwrap();

        let labels = LabelTable::from_file(file.path()).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), Some("great white shark"));
    }
}
