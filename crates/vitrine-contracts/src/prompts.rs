use crate::concepts::{Concept, MacroVariant};
use crate::session::{AspectRatio, GenerationSettings};

pub const GRID_PROMPT: &str = "Create a 3×3 grid in 3:4 aspect ratio for a high-end commercial marketing campaign using the uploaded product as the central subject.\n\nEach frame must present a distinct visual concept while maintaining perfect product consistency across all nine images.\n\nGrid Concepts (one per cell):\n\n1. Iconic hero still life with bold composition\n\n2. Extreme macro detail highlighting material, surface, or texture\n\n3. Dynamic liquid or particle interaction surrounding the product\n\n4. Minimal sculptural arrangement with abstract forms\n\n5. Floating elements composition suggesting lightness and innovation\n\n6. Sensory close-up emphasizing tactility and realism\n\n7. Color-driven conceptual scene inspired by the product palette\n\n8. Ingredient or component abstraction (non-literal, symbolic)\n\n9. Surreal yet elegant fusion scene combining realism and imagination\n\nVisual Rules:\nProduct must remain 100% accurate in shape, proportions, label, typography, color, and branding\nNo distortion, deformation, or redesign of the product\nClean separation between product and background\n\nLighting & Style:\nSoft, controlled studio lighting\nSubtle highlights, realistic shadows\nHigh dynamic range, ultra-sharp focus\nEditorial luxury advertising aesthetic\nPremium sensory marketing look\n\nOverall Feel:\nModern, refined, visually cohesive\nHigh-end commercial campaign\nDesigned for brand websites, social grids, and digital billboards\nHyperreal, cinematic, polished, and aspirational";

pub const INDIVIDUAL_PROMPT_TEMPLATE: &str = "Create a single high-end commercial marketing image using the uploaded product as the central subject.\n\nConcept: {CONCEPT_PROMPT}\n\nVisual Rules:\nProduct must remain 100% accurate in shape, proportions, label, typography, color, and branding\nNo distortion, deformation, or redesign of the product\nClean separation between product and background\n\nLighting & Style:\nSoft, controlled studio lighting\nSubtle highlights, realistic shadows\nHigh dynamic range, ultra-sharp focus\nEditorial luxury advertising aesthetic\nPremium sensory marketing look\n\nOverall Feel:\nModern, refined, visually cohesive\nHigh-end commercial campaign\nDesigned for brand websites, social grids, and digital billboards\nHyperreal, cinematic, polished, and aspirational";

pub const MACRO_BASE_RULES: &str = "Visual Rules:\nProduct must remain 100% accurate in all visible details - no invention or redesign\nCapture authentic textures, materials, and finishes exactly as they appear\nMaintain true colors and material properties\n\nLighting & Style:\nSoft, controlled macro studio lighting\nBeautiful specular highlights that reveal surface quality\nHigh dynamic range, ultra-sharp focus on the focal point\nEditorial luxury advertising aesthetic\n\nTechnical Excellence:\nProfessional macro photography look\nStudio quality with perfect exposure\nRich detail and clarity in the focused area\nHyperreal, cinematic, polished finish";

pub const PROMPT_OPTIMIZER_SYSTEM: &str = "You are an expert prompt engineer specializing in AI image generation. Your task is to optimize user prompts following these golden rules:\n\n1. USE NATURAL LANGUAGE & FULL SENTENCES\nTalk as if briefing a human artist. Use proper grammar and descriptive adjectives.\n- Bad: \"Cool car, neon, city, night, 8k\"\n- Good: \"A cinematic wide shot of a futuristic sports car speeding through a rainy Tokyo street at night. The neon signs reflect off the wet pavement and the car's metallic chassis.\"\n\n2. BE SPECIFIC AND DESCRIPTIVE\nDefine the subject, setting, lighting, and mood.\n- Subject: Instead of \"a woman,\" say \"a sophisticated elderly woman wearing a vintage chanel-style suit\"\n- Materiality: Describe textures like \"matte finish,\" \"brushed steel,\" \"soft velvet,\" \"crumpled paper\"\n\n3. PROVIDE CONTEXT (THE \"WHY\" OR \"FOR WHOM\")\nGiving context helps the model make logical artistic decisions.\n- Example: \"Create an image of a sandwich for a Brazilian high-end gourmet cookbook\"\n- The model will infer professional plating, shallow depth of field, and perfect lighting\n\n4. FOCUS ON PROFESSIONAL ASSET PRODUCTION\nThis model excels at:\n- Text rendering\n- Character consistency\n- Visual synthesis\n- High-resolution (4K) output\n\nTake the user's prompt and rewrite it following these rules. Keep the core intent but make it more descriptive, specific, and professional. Output ONLY the optimized prompt, nothing else.";

/// What to render, fully resolved to the catalog entries involved.
#[derive(Debug, Clone, Copy)]
pub enum PromptRequest<'a> {
    Grid,
    Concept(&'a Concept),
    Macro(&'a MacroVariant),
    Custom(&'a str),
}

/// Deterministic prompt assembly: identical inputs produce byte-identical
/// output, so prompts can be reproduced after the fact.
pub fn build_prompt(request: PromptRequest<'_>, settings: &GenerationSettings) -> String {
    let body = match request {
        PromptRequest::Grid => GRID_PROMPT.to_string(),
        PromptRequest::Concept(concept) => {
            INDIVIDUAL_PROMPT_TEMPLATE.replace("{CONCEPT_PROMPT}", concept.prompt)
        }
        PromptRequest::Macro(variant) => format!("{}\n\n{}", variant.prompt, MACRO_BASE_RULES),
        PromptRequest::Custom(text) => format!(
            "Using the uploaded product image as reference, create a professional marketing image based on the following concept:\n\n{}\n\nVisual Rules:\n- Product must remain 100% accurate in shape, proportions, label, typography, color, and branding\n- No distortion, deformation, or redesign of the product\n- Clean separation between product and background\n- Soft, controlled studio lighting\n- High dynamic range, ultra-sharp focus\n- Editorial luxury advertising aesthetic",
            text.trim()
        ),
    };
    format!("{}{}", body, settings_suffix(settings))
}

/// Resolution is always stated; aspect ratio only when the user picked one.
fn settings_suffix(settings: &GenerationSettings) -> String {
    let mut parts = Vec::new();
    if settings.aspect_ratio != AspectRatio::Auto {
        parts.push(format!("Aspect ratio: {}", settings.aspect_ratio.as_str()));
    }
    parts.push(format!(
        "Output resolution: {}px on longest side",
        settings.resolution.longest_side_px()
    ));
    format!("\n\nImage Settings:\n{}", parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::{CONCEPTS, MACRO_VARIANTS};
    use crate::session::Resolution;

    fn settings() -> GenerationSettings {
        GenerationSettings::default()
    }

    #[test]
    fn build_prompt_is_deterministic_for_every_request_kind() {
        let settings = settings();
        let requests = [
            PromptRequest::Grid,
            PromptRequest::Concept(&CONCEPTS[0]),
            PromptRequest::Macro(&MACRO_VARIANTS[2]),
            PromptRequest::Custom("bottle on wet slate"),
        ];
        for request in requests {
            assert_eq!(
                build_prompt(request, &settings),
                build_prompt(request, &settings)
            );
        }
    }

    #[test]
    fn concept_prompt_substitutes_the_fragment() {
        let prompt = build_prompt(PromptRequest::Concept(&CONCEPTS[4]), &settings());
        assert!(prompt.contains("Concept: Floating elements composition"));
        assert!(!prompt.contains("{CONCEPT_PROMPT}"));
    }

    #[test]
    fn macro_prompt_appends_the_shared_rule_block() {
        let prompt = build_prompt(PromptRequest::Macro(&MACRO_VARIANTS[0]), &settings());
        assert!(prompt.starts_with("Create an extreme macro close-up"));
        assert!(prompt.contains("Soft, controlled macro studio lighting"));
    }

    #[test]
    fn custom_prompt_wraps_trimmed_text_in_fidelity_rules() {
        let prompt = build_prompt(PromptRequest::Custom("  floating in mist  "), &settings());
        assert!(prompt.contains("following concept:\n\nfloating in mist\n\n"));
        assert!(prompt.contains("Product must remain 100% accurate"));
    }

    #[test]
    fn suffix_states_resolution_and_optional_aspect_ratio() {
        let default_prompt = build_prompt(PromptRequest::Grid, &settings());
        assert!(default_prompt.ends_with(
            "Image Settings:\nOutput resolution: 1024px on longest side"
        ));
        assert!(!default_prompt.contains("Aspect ratio:"));

        let mut wide = settings();
        wide.aspect_ratio = AspectRatio::Wide;
        wide.resolution = Resolution::FourK;
        let wide_prompt = build_prompt(PromptRequest::Grid, &wide);
        assert!(wide_prompt.contains("Aspect ratio: 16:9"));
        assert!(wide_prompt.contains("Output resolution: 4096px on longest side"));
    }
}
