pub mod opportunity_scorer;

pub use opportunity_scorer::{score, Score, ScoreError};
