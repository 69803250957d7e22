mod edit_distance;

pub use edit_distance::{levenshtein, similarity};
