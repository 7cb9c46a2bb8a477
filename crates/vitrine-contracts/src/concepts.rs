use indexmap::IndexMap;
use serde::Serialize;

/// One of the nine fixed creative directions selectable in the individual
/// flow. The `prompt` fragment is spliced into the single-image template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Concept {
    pub id: u32,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub prompt: &'static str,
}

pub const CONCEPTS: [Concept; 9] = [
    Concept {
        id: 1,
        name: "Hero Still Life",
        description: "Bold, iconic composition with striking visual impact",
        icon: "🎯",
        prompt: "Iconic hero still life with bold composition",
    },
    Concept {
        id: 2,
        name: "Macro Detail",
        description: "Extreme close-up highlighting texture and material",
        icon: "🔍",
        prompt: "Extreme macro detail highlighting material, surface, or texture",
    },
    Concept {
        id: 3,
        name: "Dynamic Interaction",
        description: "Liquid or particle effects surrounding the product",
        icon: "💫",
        prompt: "Dynamic liquid or particle interaction surrounding the product",
    },
    Concept {
        id: 4,
        name: "Sculptural Minimal",
        description: "Clean arrangement with abstract geometric forms",
        icon: "🔷",
        prompt: "Minimal sculptural arrangement with abstract forms",
    },
    Concept {
        id: 5,
        name: "Floating Elements",
        description: "Weightless composition suggesting innovation",
        icon: "☁️",
        prompt: "Floating elements composition suggesting lightness and innovation",
    },
    Concept {
        id: 6,
        name: "Sensory Close-up",
        description: "Tactile realism emphasizing touch and feel",
        icon: "✋",
        prompt: "Sensory close-up emphasizing tactility and realism",
    },
    Concept {
        id: 7,
        name: "Color Concept",
        description: "Scene driven by the product color palette",
        icon: "🎨",
        prompt: "Color-driven conceptual scene inspired by the product palette",
    },
    Concept {
        id: 8,
        name: "Abstract Essence",
        description: "Symbolic ingredient or component visualization",
        icon: "✨",
        prompt: "Ingredient or component abstraction (non-literal, symbolic)",
    },
    Concept {
        id: 9,
        name: "Surreal Fusion",
        description: "Elegant blend of realism and imagination",
        icon: "🌙",
        prompt: "Surreal yet elegant fusion scene combining realism and imagination",
    },
];

/// One of the four fixed close-up framings used by the macro-set flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroVariant {
    pub name: &'static str,
    pub prompt: &'static str,
}

pub const MACRO_VARIANTS: [MacroVariant; 4] = [
    MacroVariant {
        name: "Ultra Detail",
        prompt: "Create an extreme macro close-up photograph focusing on the most distinctive surface detail or texture of the uploaded product.\n\nFocus on: The most visually interesting texture, material finish, or surface detail (like embossing, grain, label texture, cap threading, or material surface)\nComposition: Fill 80-90% of frame with the detail, abstract composition where the full product shape is not visible\nDepth of field: Ultra-shallow, razor-thin focus plane with beautiful bokeh on surrounding areas",
    },
    MacroVariant {
        name: "Logo & Branding",
        prompt: "Create a macro close-up photograph highlighting the logo, typography, or key branding element of the uploaded product.\n\nFocus on: The product logo, brand name, or most important text/graphic element\nComposition: The branding element should be the clear hero, with some product context visible around it\nDepth of field: Shallow focus on the text/logo with gentle blur on surrounding product surface",
    },
    MacroVariant {
        name: "Form & Silhouette",
        prompt: "Create a medium-close macro photograph showcasing the elegant form, curves, or architectural shape of the uploaded product.\n\nFocus on: The product's distinctive shape, an interesting curve, edge, corner, or structural detail\nComposition: Show enough of the product to appreciate its form while maintaining an intimate macro perspective\nDepth of field: Selective focus that draws attention to the most beautiful curve or edge",
    },
    MacroVariant {
        name: "Material Study",
        prompt: "Create a macro photograph that feels like a material study, emphasizing the tactile quality and craftsmanship of the uploaded product.\n\nFocus on: Where different materials meet, a seam, cap closure, or where the product shows its construction quality\nComposition: Capture a detail that makes viewers want to reach out and touch the product\nDepth of field: Medium-shallow, allowing appreciation of the material's tactile qualities",
    },
];

/// Catalog lookup preserving the fixed display order.
#[derive(Debug, Clone)]
pub struct ConceptRegistry {
    concepts: IndexMap<u32, Concept>,
}

impl ConceptRegistry {
    pub fn get(&self, id: u32) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

impl Default for ConceptRegistry {
    fn default() -> Self {
        let mut concepts = IndexMap::new();
        for concept in CONCEPTS {
            concepts.insert(concept.id, concept);
        }
        Self { concepts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keeps_catalog_order_and_ids() {
        let registry = ConceptRegistry::default();
        assert_eq!(registry.len(), 9);
        let ids: Vec<u32> = registry.iter().map(|concept| concept.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(registry.get(7).map(|c| c.name), Some("Color Concept"));
        assert!(registry.get(10).is_none());
    }

    #[test]
    fn macro_variants_are_a_fixed_quartet() {
        assert_eq!(MACRO_VARIANTS.len(), 4);
        assert_eq!(MACRO_VARIANTS[0].name, "Ultra Detail");
        assert_eq!(MACRO_VARIANTS[3].name, "Material Study");
    }
}
