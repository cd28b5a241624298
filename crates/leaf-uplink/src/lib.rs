pub mod classifier;
pub mod doctor;
pub mod journal;

pub use classifier::{classify_with_timeout, Classification, Classifier, ClassifierConfig, ClassifyError, HttpClassifier};
pub use journal::{Journal, JournalConfig};
