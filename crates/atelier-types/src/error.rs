use thiserror::Error;

use crate::models::Rarity;

/// Errors from parsing or validating a pack recipe.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("malformed recipe: {0}")]
    Malformed(String),

    #[error("invalid chance {chance} for tier {rarity}: must be strictly between 0 and 1")]
    InvalidChance { rarity: Rarity, chance: f64 },
}
