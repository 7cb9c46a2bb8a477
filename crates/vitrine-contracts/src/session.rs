use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::costs::{apply_usage, PricingTable, SessionCosts, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    #[default]
    Upload,
    Flow,
    Configure,
    Results,
}

impl WizardStep {
    const ORDER: [WizardStep; 4] = [
        WizardStep::Upload,
        WizardStep::Flow,
        WizardStep::Configure,
        WizardStep::Results,
    ];

    fn position(self) -> usize {
        Self::ORDER
            .iter()
            .position(|step| *step == self)
            .unwrap_or(0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WizardStep::Upload => "upload",
            WizardStep::Flow => "flow",
            WizardStep::Configure => "configure",
            WizardStep::Results => "results",
        }
    }
}

/// The user's generation strategy. Grid and macro-set flows have no
/// per-flow configuration, so they bypass the configure step entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowMode {
    Grid,
    Individual,
    MacroSet,
    Custom,
}

impl FlowMode {
    pub fn skips_configure(self) -> bool {
        matches!(self, FlowMode::Grid | FlowMode::MacroSet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowMode::Grid => "grid",
            FlowMode::Individual => "individual",
            FlowMode::MacroSet => "macroSet",
            FlowMode::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Auto => "auto",
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1k")]
    OneK,
    #[serde(rename = "2k")]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::OneK => "1k",
            Resolution::TwoK => "2k",
            Resolution::FourK => "4k",
        }
    }

    pub fn longest_side_px(self) -> u32 {
        match self {
            Resolution::OneK => 1024,
            Resolution::TwoK => 2048,
            Resolution::FourK => 4096,
        }
    }
}

pub const MIN_VARIATIONS: u32 = 1;
pub const MAX_VARIATIONS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub variations: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Auto,
            resolution: Resolution::OneK,
            variations: MIN_VARIATIONS,
        }
    }
}

/// Partial settings update; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsPatch {
    pub aspect_ratio: Option<AspectRatio>,
    pub resolution: Option<Resolution>,
    pub variations: Option<u32>,
}

/// The uploaded product photo, held as base64 for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub concept_id: Option<u32>,
    pub concept_name: Option<String>,
    pub image_data: String,
    pub prompt: String,
    pub usage: Option<TokenUsage>,
}

impl GeneratedImage {
    pub fn new(image_data: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            concept_id: None,
            concept_name: None,
            image_data: image_data.into(),
            prompt: prompt.into(),
            usage: None,
        }
    }

    pub fn with_concept(mut self, id: u32, name: impl Into<String>) -> Self {
        self.concept_id = Some(id);
        self.concept_name = Some(name.into());
        self
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }
}

/// Single-session wizard state. The fields stay private so every mutation
/// funnels through the operations below; invalid transitions are no-ops
/// rather than errors.
#[derive(Debug, Clone, Default)]
pub struct WizardSession {
    current_step_value: WizardStep,
    source_image: Option<SourceImage>,
    image_preview: Option<String>,
    mode: Option<FlowMode>,
    selected_concepts: Vec<u32>,
    custom_prompt: String,
    optimized_prompt: Option<String>,
    results: Vec<GeneratedImage>,
    run_error: Option<String>,
    is_running: bool,
    settings: GenerationSettings,
    session_costs: SessionCosts,
}

impl WizardSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_step(&self) -> WizardStep {
        self.current_step_value
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn source_image(&self) -> Option<&SourceImage> {
        self.source_image.as_ref()
    }

    pub fn image_preview(&self) -> Option<&str> {
        self.image_preview.as_deref()
    }

    pub fn mode(&self) -> Option<FlowMode> {
        self.mode
    }

    pub fn selected_concepts(&self) -> &[u32] {
        &self.selected_concepts
    }

    pub fn custom_prompt(&self) -> &str {
        &self.custom_prompt
    }

    pub fn optimized_prompt(&self) -> Option<&str> {
        self.optimized_prompt.as_deref()
    }

    pub fn results(&self) -> &[GeneratedImage] {
        &self.results
    }

    pub fn run_error(&self) -> Option<&str> {
        self.run_error.as_deref()
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn session_costs(&self) -> SessionCosts {
        self.session_costs
    }

    pub fn set_image(&mut self, image: SourceImage, preview: Option<String>) {
        self.source_image = Some(image);
        self.image_preview = preview;
        self.clear_run_error();
    }

    pub fn clear_image(&mut self) {
        self.source_image = None;
        self.image_preview = None;
    }

    /// Selecting a flow discards every flow-specific choice made so far.
    pub fn set_mode(&mut self, mode: FlowMode) {
        self.mode = Some(mode);
        self.selected_concepts.clear();
        self.custom_prompt.clear();
        self.optimized_prompt = None;
    }

    /// Adds the concept when absent, removes it when present. Selection
    /// order is toggle order, which is also generation order.
    pub fn toggle_concept(&mut self, concept_id: u32) {
        if let Some(index) = self
            .selected_concepts
            .iter()
            .position(|id| *id == concept_id)
        {
            self.selected_concepts.remove(index);
        } else {
            self.selected_concepts.push(concept_id);
        }
    }

    /// Any edit to the draft invalidates a previously optimized version.
    pub fn set_custom_prompt(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.custom_prompt {
            self.optimized_prompt = None;
        }
        self.custom_prompt = text;
    }

    pub fn set_optimized_prompt(&mut self, text: Option<String>) {
        self.optimized_prompt = text;
    }

    /// Accepts the optimized text as the draft to generate from.
    pub fn apply_optimized_prompt(&mut self) {
        if let Some(text) = self.optimized_prompt.clone() {
            self.custom_prompt = text;
        }
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) {
        if let Some(aspect_ratio) = patch.aspect_ratio {
            self.settings.aspect_ratio = aspect_ratio;
        }
        if let Some(resolution) = patch.resolution {
            self.settings.resolution = resolution;
        }
        if let Some(variations) = patch.variations {
            self.settings.variations = variations.clamp(MIN_VARIATIONS, MAX_VARIATIONS);
        }
    }

    pub fn can_advance(&self) -> bool {
        match self.current_step_value {
            WizardStep::Upload => self.source_image.is_some(),
            WizardStep::Flow => self.mode.is_some(),
            WizardStep::Configure => match self.mode {
                Some(FlowMode::Grid) | Some(FlowMode::MacroSet) => true,
                Some(FlowMode::Individual) => !self.selected_concepts.is_empty(),
                Some(FlowMode::Custom) => !self.custom_prompt.trim().is_empty(),
                None => false,
            },
            WizardStep::Results => true,
        }
    }

    pub fn advance(&mut self) {
        if self.current_step_value == WizardStep::Results || !self.can_advance() {
            return;
        }
        let target = if self.current_step_value == WizardStep::Flow
            && self.mode.map(FlowMode::skips_configure).unwrap_or(false)
        {
            WizardStep::Results
        } else {
            WizardStep::ORDER[self.current_step_value.position() + 1]
        };
        self.go_to_step(target);
    }

    pub fn retreat(&mut self) {
        if self.current_step_value == WizardStep::Upload {
            return;
        }
        // Without a flow there is nothing to configure, so a missing mode
        // retreats past the configure step too.
        let target = if self.current_step_value == WizardStep::Results
            && self.mode.map(FlowMode::skips_configure).unwrap_or(true)
        {
            WizardStep::Flow
        } else {
            WizardStep::ORDER[self.current_step_value.position() - 1]
        };
        self.go_to_step(target);
    }

    /// Every step transition drops the previous run's error.
    pub fn go_to_step(&mut self, step: WizardStep) {
        self.current_step_value = step;
        self.clear_run_error();
    }

    pub fn push_result(&mut self, image: GeneratedImage) {
        self.results.push(image);
    }

    pub fn replace_results(&mut self, results: Vec<GeneratedImage>) {
        self.results = results;
    }

    pub fn set_run_error(&mut self, message: impl Into<String>) {
        self.run_error = Some(message.into());
    }

    pub fn clear_run_error(&mut self) {
        self.run_error = None;
    }

    pub fn record_usage(&mut self, usage: &TokenUsage, pricing: &PricingTable) {
        self.session_costs = apply_usage(
            &self.session_costs,
            usage,
            self.settings.resolution,
            pricing,
        );
    }

    /// Claims the run latch. Returns false when a run is already in flight;
    /// the caller must not start another one.
    pub fn begin_run(&mut self) -> bool {
        if self.is_running {
            return false;
        }
        self.is_running = true;
        self.clear_run_error();
        true
    }

    pub fn finish_run(&mut self) {
        self.is_running = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded_session() -> WizardSession {
        let mut session = WizardSession::new();
        session.set_image(
            SourceImage {
                data: "aGVsbG8=".to_string(),
                mime_type: "image/png".to_string(),
            },
            Some("preview-1".to_string()),
        );
        session
    }

    #[test]
    fn defaults_match_initial_state() {
        let session = WizardSession::new();
        assert_eq!(session.current_step(), WizardStep::Upload);
        assert!(session.source_image().is_none());
        assert!(session.mode().is_none());
        assert_eq!(session.settings().aspect_ratio, AspectRatio::Auto);
        assert_eq!(session.settings().resolution, Resolution::OneK);
        assert_eq!(session.settings().variations, 1);
        assert_eq!(session.session_costs(), SessionCosts::default());
    }

    #[test]
    fn advance_requires_an_image_then_a_flow() {
        let mut session = WizardSession::new();
        session.advance();
        assert_eq!(session.current_step(), WizardStep::Upload);

        let mut session = uploaded_session();
        session.advance();
        assert_eq!(session.current_step(), WizardStep::Flow);
        session.advance();
        assert_eq!(session.current_step(), WizardStep::Flow);

        session.set_mode(FlowMode::Individual);
        session.advance();
        assert_eq!(session.current_step(), WizardStep::Configure);
    }

    #[test]
    fn grid_and_macro_set_skip_configure_both_directions() {
        for mode in [FlowMode::Grid, FlowMode::MacroSet] {
            let mut session = uploaded_session();
            session.advance();
            session.set_mode(mode);
            session.advance();
            assert_eq!(session.current_step(), WizardStep::Results);
            session.retreat();
            assert_eq!(session.current_step(), WizardStep::Flow);
        }
    }

    #[test]
    fn configure_gate_follows_the_selected_flow() {
        let mut session = uploaded_session();
        session.advance();
        session.set_mode(FlowMode::Individual);
        session.advance();
        assert!(!session.can_advance());
        session.toggle_concept(3);
        assert!(session.can_advance());
        session.toggle_concept(3);
        assert!(!session.can_advance());

        session.set_mode(FlowMode::Custom);
        assert!(!session.can_advance());
        session.set_custom_prompt("   ");
        assert!(!session.can_advance());
        session.set_custom_prompt("product on black marble");
        assert!(session.can_advance());
    }

    #[test]
    fn set_mode_discards_flow_specific_selections() {
        let mut session = WizardSession::new();
        session.set_mode(FlowMode::Individual);
        session.toggle_concept(1);
        session.toggle_concept(5);
        session.set_custom_prompt("draft");
        session.set_optimized_prompt(Some("polished draft".to_string()));

        session.set_mode(FlowMode::Custom);
        assert!(session.selected_concepts().is_empty());
        assert!(session.custom_prompt().is_empty());
        assert!(session.optimized_prompt().is_none());
    }

    #[test]
    fn editing_the_draft_invalidates_the_optimized_prompt() {
        let mut session = WizardSession::new();
        session.set_mode(FlowMode::Custom);
        session.set_custom_prompt("neon bottle");
        session.set_optimized_prompt(Some("a neon-lit bottle".to_string()));

        session.set_custom_prompt("neon bottle");
        assert!(session.optimized_prompt().is_some());

        session.set_custom_prompt("neon bottle at night");
        assert!(session.optimized_prompt().is_none());
    }

    #[test]
    fn toggle_concept_keeps_selection_order() {
        let mut session = WizardSession::new();
        session.set_mode(FlowMode::Individual);
        session.toggle_concept(4);
        session.toggle_concept(2);
        session.toggle_concept(9);
        session.toggle_concept(2);
        assert_eq!(session.selected_concepts(), [4, 9]);
    }

    #[test]
    fn update_settings_clamps_variations() {
        let mut session = WizardSession::new();
        session.update_settings(SettingsPatch {
            variations: Some(7),
            ..SettingsPatch::default()
        });
        assert_eq!(session.settings().variations, MAX_VARIATIONS);
        session.update_settings(SettingsPatch {
            variations: Some(0),
            resolution: Some(Resolution::FourK),
            ..SettingsPatch::default()
        });
        assert_eq!(session.settings().variations, MIN_VARIATIONS);
        assert_eq!(session.settings().resolution, Resolution::FourK);
    }

    #[test]
    fn step_transitions_clear_the_run_error() {
        let mut session = uploaded_session();
        session.advance();
        session.set_mode(FlowMode::Grid);
        session.advance();
        session.set_run_error("one task failed");
        session.retreat();
        assert!(session.run_error().is_none());
    }

    #[test]
    fn clear_run_error_drops_the_warning() {
        let mut session = WizardSession::new();
        session.set_run_error("one task failed");
        assert_eq!(session.run_error(), Some("one task failed"));
        session.clear_run_error();
        assert!(session.run_error().is_none());
    }

    #[test]
    fn retreat_from_results_without_a_flow_skips_configure() {
        let mut session = WizardSession::new();
        session.go_to_step(WizardStep::Results);
        session.retreat();
        assert_eq!(session.current_step(), WizardStep::Flow);
    }

    #[test]
    fn replace_results_swaps_the_whole_gallery() {
        let mut session = WizardSession::new();
        session.push_result(GeneratedImage::new("YQ==", "first batch"));
        session.push_result(GeneratedImage::new("Yg==", "first batch"));

        session.replace_results(vec![GeneratedImage::new("Yw==", "regenerated")]);
        assert_eq!(session.results().len(), 1);
        assert_eq!(session.results()[0].prompt, "regenerated");

        session.replace_results(Vec::new());
        assert!(session.results().is_empty());
    }

    #[test]
    fn begin_run_rejects_reentry_until_finished() {
        let mut session = WizardSession::new();
        assert!(session.begin_run());
        assert!(session.is_running());
        assert!(!session.begin_run());
        session.finish_run();
        assert!(!session.is_running());
        assert!(session.begin_run());
    }

    #[test]
    fn reset_restores_everything_at_once() {
        let mut session = uploaded_session();
        session.advance();
        session.set_mode(FlowMode::Grid);
        session.advance();
        session.push_result(GeneratedImage::new("ZGF0YQ==", "prompt"));
        session.record_usage(
            &TokenUsage {
                input_tokens: 1000,
                output_tokens: 500,
                total_tokens: 1500,
            },
            &PricingTable::builtin(),
        );
        session.set_run_error("late failure");

        session.reset();
        assert_eq!(session.current_step(), WizardStep::Upload);
        assert!(session.mode().is_none());
        assert!(session.results().is_empty());
        assert!(session.run_error().is_none());
        assert_eq!(session.session_costs(), SessionCosts::default());
    }
}
