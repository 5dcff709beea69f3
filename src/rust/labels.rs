//! Class labels of the rice leaf disease model, indexed by class id.

/// Output order of the model's prediction vector.
pub const LABELS: [&str; 7] = [
    "Bacterial Leaf Blight",
    "Brown Spot",
    "Healthy Rice Leaf",
    "Leaf Blast",
    "Leaf Scald",
    "NOT_A_RICE_LEAF",
    "Sheath Blight",
];

/// Returns the label for a class id, or `None` if the id is out of range.
pub fn label_for(index: usize) -> Option<&'static str> {
    LABELS.get(index).copied()
}

/// The default label set as owned strings, for handing to a classifier builder.
pub fn default_labels() -> Vec<String> {
    LABELS.iter().map(|label| label.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order() {
        assert_eq!(label_for(0), Some("Bacterial Leaf Blight"));
        assert_eq!(label_for(5), Some("NOT_A_RICE_LEAF"));
        assert_eq!(label_for(6), Some("Sheath Blight"));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(label_for(7), None);
        assert_eq!(label_for(usize::MAX), None);
    }

    #[test]
    fn test_default_labels_match_table() {
        let labels = default_labels();
        assert_eq!(labels.len(), LABELS.len());
        assert_eq!(labels[2], "Healthy Rice Leaf");
    }
}
