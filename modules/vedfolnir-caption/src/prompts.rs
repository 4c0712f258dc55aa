//! Category-to-prompt mapping and prompt simplification.

/// Coarse category hint for a post, used to pick a more specific primary
/// prompt. Unknown/ambiguous posts use `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCategory {
    Generic,
    Portrait,
    Landscape,
    FoodAndDrink,
    Document,
    Screenshot,
    Animal,
}

impl ImageCategory {
    /// Maps an arbitrary caller-supplied hint string onto the coarser set
    /// that fallback simplification actually dispatches on.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.to_lowercase()) {
            Some(h) if h.contains("portrait") || h.contains("face") || h.contains("person") => {
                ImageCategory::Portrait
            }
            Some(h) if h.contains("landscape") || h.contains("scenery") || h.contains("nature") => {
                ImageCategory::Landscape
            }
            Some(h) if h.contains("food") || h.contains("drink") || h.contains("meal") => {
                ImageCategory::FoodAndDrink
            }
            Some(h) if h.contains("document") || h.contains("text") || h.contains("pdf") => {
                ImageCategory::Document
            }
            Some(h) if h.contains("screenshot") || h.contains("ui") => ImageCategory::Screenshot,
            Some(h) if h.contains("animal") || h.contains("pet") || h.contains("cat") || h.contains("dog") => {
                ImageCategory::Animal
            }
            _ => ImageCategory::Generic,
        }
    }

    /// Primary, category-specific prompt. Falls back to a generic
    /// descriptive prompt for `Generic`.
    pub fn primary_prompt(self) -> &'static str {
        match self {
            ImageCategory::Generic => {
                "Describe this image in one or two clear, concise sentences suitable as alt text for a screen reader. Focus on the most important visual content."
            }
            ImageCategory::Portrait => {
                "Describe the person or people in this image: their apparent pose, expression, and setting, in one or two sentences suitable as alt text. Do not guess at identity."
            }
            ImageCategory::Landscape => {
                "Describe this landscape or outdoor scene in one or two sentences suitable as alt text, noting prominent terrain, weather, and lighting."
            }
            ImageCategory::FoodAndDrink => {
                "Describe this food or drink image in one or two sentences suitable as alt text, naming the dish or items if identifiable."
            }
            ImageCategory::Document => {
                "Transcribe or summarise the visible text and layout of this document image in one or two sentences suitable as alt text."
            }
            ImageCategory::Screenshot => {
                "Describe what is shown in this screenshot in one or two sentences suitable as alt text, including visible application or interface elements."
            }
            ImageCategory::Animal => {
                "Describe the animal(s) in this image, their species if apparent, and what they are doing, in one or two sentences suitable as alt text."
            }
        }
    }

    /// Simpler prompt for fallback rung 1: same model, less to get wrong.
    pub fn simplified_prompt(self) -> &'static str {
        "Briefly describe the main subject of this image in one short sentence."
    }

    /// Simplest prompt for fallback rung 2: paired with the backup model.
    pub fn simplest_prompt(self) -> &'static str {
        "What is in this image? Answer in a few words."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_maps_to_coarse_category() {
        assert_eq!(ImageCategory::from_hint(Some("Portrait photo")), ImageCategory::Portrait);
        assert_eq!(ImageCategory::from_hint(Some("my dog")), ImageCategory::Animal);
        assert_eq!(ImageCategory::from_hint(None), ImageCategory::Generic);
        assert_eq!(ImageCategory::from_hint(Some("something unrelated")), ImageCategory::Generic);
    }

    #[test]
    fn every_category_has_distinct_prompts() {
        for category in [
            ImageCategory::Generic,
            ImageCategory::Portrait,
            ImageCategory::Landscape,
            ImageCategory::FoodAndDrink,
            ImageCategory::Document,
            ImageCategory::Screenshot,
            ImageCategory::Animal,
        ] {
            assert!(!category.primary_prompt().is_empty());
            assert!(!category.simplified_prompt().is_empty());
            assert!(!category.simplest_prompt().is_empty());
        }
    }
}
