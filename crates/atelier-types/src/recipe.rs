use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RecipeError;
use crate::models::Rarity;

/// One recipe entry for a rarity tier. The legacy data model stored a bare
/// number and treated values below 1.0 as probabilities, which made `0.2`
/// ambiguous; the tagged form makes the two meanings explicit:
///
/// ```json
/// {"common": {"count": 3}, "rare": {"chance": 0.2}}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipeEntry {
    /// Exactly `count` artworks of this tier.
    Fixed { count: u32 },
    /// A single weighted coin-flip for one bonus artwork of this tier.
    Chance { chance: f64 },
}

/// A pack recipe: desired artworks per rarity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipe(pub BTreeMap<Rarity, RecipeEntry>);

impl Recipe {
    pub fn new(entries: impl IntoIterator<Item = (Rarity, RecipeEntry)>) -> Self {
        Recipe(entries.into_iter().collect())
    }

    /// Validate entry ranges: a chance must be a probability strictly between
    /// 0 and 1 (a certain bonus item should be written as a fixed count).
    pub fn validate(&self) -> Result<(), RecipeError> {
        for (rarity, entry) in &self.0 {
            if let RecipeEntry::Chance { chance } = entry {
                if !(chance.is_finite() && *chance > 0.0 && *chance < 1.0) {
                    return Err(RecipeError::InvalidChance {
                        rarity: *rarity,
                        chance: *chance,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn parse(json: &str) -> Result<Self, RecipeError> {
        let recipe: Recipe =
            serde_json::from_str(json).map_err(|e| RecipeError::Malformed(e.to_string()))?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn to_json(&self) -> Result<String, RecipeError> {
        serde_json::to_string(self).map_err(|e| RecipeError::Malformed(e.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rarity, &RecipeEntry)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_entries() {
        let recipe =
            Recipe::parse(r#"{"common":{"count":3},"uncommon":{"count":1},"rare":{"chance":0.2}}"#)
                .unwrap();
        assert_eq!(
            recipe.0.get(&Rarity::Common),
            Some(&RecipeEntry::Fixed { count: 3 })
        );
        assert_eq!(
            recipe.0.get(&Rarity::Rare),
            Some(&RecipeEntry::Chance { chance: 0.2 })
        );
    }

    #[test]
    fn rejects_unknown_tier() {
        assert!(Recipe::parse(r#"{"mythic":{"count":1}}"#).is_err());
    }

    #[test]
    fn rejects_out_of_range_chance() {
        assert!(matches!(
            Recipe::parse(r#"{"rare":{"chance":1.5}}"#),
            Err(RecipeError::InvalidChance { .. })
        ));
        assert!(Recipe::parse(r#"{"rare":{"chance":0.0}}"#).is_err());
    }

    #[test]
    fn rejects_bare_numbers() {
        // The ambiguous legacy shape is not accepted.
        assert!(Recipe::parse(r#"{"common":3,"rare":0.2}"#).is_err());
    }

    #[test]
    fn json_round_trip() {
        let recipe = Recipe::new([
            (Rarity::Common, RecipeEntry::Fixed { count: 2 }),
            (Rarity::Legendary, RecipeEntry::Chance { chance: 0.5 }),
        ]);
        let json = recipe.to_json().unwrap();
        assert_eq!(Recipe::parse(&json).unwrap(), recipe);
    }
}
