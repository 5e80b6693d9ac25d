use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub color: ColorConfig,
    pub texture: TextureConfig,
    pub realtime: RealtimeConfig,
    pub precision: PrecisionConfig,
    pub fusion: FusionConfig,
    pub scenario: ScenarioThresholds,
    pub model: ModelConfig,
    pub learning: LearningConfig,
    pub io: IoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub default_method: DetectionMethod,
    pub mode: Mode,
    /// Inputs larger than this are downscaled before detection.
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            default_method: DetectionMethod::Combined,
            mode: Mode::Standard,
            max_width: 1920,
            max_height: 1080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub contrast_threshold: f64,
    pub brightness_threshold: f64,
    pub clahe_clip_limit: f32,
    pub clahe_tile_grid: u32,
    pub min_area: u32,
    pub adaptive_min_area: bool,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            contrast_threshold: 0.4,
            brightness_threshold: 0.3,
            clahe_clip_limit: 2.0,
            clahe_tile_grid: 8,
            min_area: 1000,
            adaptive_min_area: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub fixed_threshold: u8,
    pub adaptive_threshold: bool,
    pub gabor_kernel_size: u32,
    pub gabor_sigma: f32,
    pub gabor_gamma: f32,
    pub gabor_angles: Vec<f32>,
    pub gabor_frequencies: Vec<f32>,
    pub lbp_radius: u32,
    pub lbp_points: u32,
    pub variance_window: u32,
    pub min_area: u32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            fixed_threshold: 30,
            adaptive_threshold: true,
            gabor_kernel_size: 21,
            gabor_sigma: 4.0,
            gabor_gamma: 0.5,
            gabor_angles: vec![0.0, 45.0, 90.0, 135.0],
            gabor_frequencies: vec![0.1, 0.3, 0.5],
            lbp_radius: 3,
            lbp_points: 8,
            variance_window: 9,
            min_area: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Working-resolution scale factor in (0, 1].
    pub reduced_resolution: f32,
    /// Live loop runs detection on one frame out of `frame_skip`.
    pub frame_skip: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reduced_resolution: 0.5,
            frame_skip: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    pub morphology_iterations: u32,
    pub multi_scale: Vec<f32>,
    pub watershed: bool,
    /// Coverage fraction above which watershed separation runs.
    pub watershed_coverage: f64,
    pub outlier_rejection: bool,
    pub min_region_area: u32,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            morphology_iterations: 3,
            multi_scale: vec![0.75, 1.0, 1.25],
            watershed: true,
            watershed_coverage: 0.8,
            outlier_rejection: false,
            min_region_area: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub standard_threshold: u8,
    pub precision_percentile: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            standard_threshold: 127,
            precision_percentile: 70.0,
        }
    }
}

/// Hand-tuned scenario cutoffs, kept overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioThresholds {
    pub low_light: f64,
    pub overexposed: f64,
    pub low_contrast: f64,
    pub method_disagreement: f64,
    pub sparse_coverage: f64,
    pub dense_coverage: f64,
    pub poor_focus: f64,
}

impl Default for ScenarioThresholds {
    fn default() -> Self {
        Self {
            low_light: 0.2,
            overexposed: 0.9,
            low_contrast: 0.1,
            method_disagreement: 0.5,
            sparse_coverage: 0.05,
            dense_coverage: 0.8,
            poor_focus: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: Option<String>,
    pub allow_simulation: bool,
    pub input_width: u32,
    pub input_height: u32,
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            allow_simulation: true,
            input_width: 256,
            input_height: 256,
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// `None` keeps the knowledge base in memory only.
    pub knowledge_file: Option<String>,
    pub max_examples: usize,
    pub learning_rate: f64,
    pub similarity_window: usize,
    pub bootstrap_synthetic: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            knowledge_file: None,
            max_examples: 100,
            learning_rate: 0.05,
            similarity_window: 20,
            bootstrap_synthetic: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub save_masks: bool,
    pub detection_timeout_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: "input".to_string(),
            output_dir: "output".to_string(),
            save_masks: true,
            detection_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// SELECTORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Color,
    Texture,
    Combined,
    #[serde(alias = "deeplearning", alias = "model-based")]
    Model,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Texture => "texture",
            Self::Combined => "combined",
            Self::Model => "model",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "color" => Some(Self::Color),
            "texture" => Some(Self::Texture),
            "combined" => Some(Self::Combined),
            "model" | "model-based" | "deeplearning" => Some(Self::Model),
            _ => None,
        }
    }
}

/// Operating mode. `Standard` is the state where neither realtime nor
/// precision is active, so the two can never be on together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Standard,
    Realtime,
    Precision,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Realtime => "realtime",
            Self::Precision => "precision",
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self, Self::Realtime)
    }

    pub fn is_precision(&self) -> bool {
        matches!(self, Self::Precision)
    }
}

/// Identifier of a single classifier in the method bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Color,
    Texture,
    Gradient,
    Statistical,
    Model,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Texture => "texture",
            Self::Gradient => "gradient_pattern",
            Self::Statistical => "statistical_pattern",
            Self::Model => "model",
        }
    }
}

// ============================================================================
// STATS RECORDS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorDiagnostics {
    pub calibration_used: bool,
    pub clahe_applied: bool,
    pub adaptive_min_area: u32,
    pub initial_coverage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureDiagnostics {
    pub avg_texture_score: f64,
    pub max_texture_score: f64,
    pub texture_complexity: f64,
    pub lbp_variance: f64,
    pub threshold_used: u8,
    pub realtime: bool,
    pub clahe_applied: bool,
    pub edge_enhanced: bool,
    pub gradient_weight: f32,
    pub gabor_weight: f32,
    pub lbp_weight: f32,
    pub variance_weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientDiagnostics {
    pub mean_magnitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticalDiagnostics {
    pub mean_hue: f64,
    pub mean_saturation_variance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub backend: String,
    pub threshold_used: f32,
    pub prediction_certainty: f64,
    pub consensus_score: f64,
    pub adaptive_boost: f64,
    pub scales: Vec<f32>,
}

/// Method-specific diagnostics, one plain struct per classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodDiagnostics {
    Color(ColorDiagnostics),
    Texture(TextureDiagnostics),
    Gradient(GradientDiagnostics),
    Statistical(StatisticalDiagnostics),
    Model(ModelDiagnostics),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub method: MethodKind,
    pub coverage_percentage: f64,
    pub confidence_score: f64,
    pub grass_pixels: u64,
    pub total_pixels: u64,
    pub num_components: usize,
    pub diagnostics: MethodDiagnostics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioFlags {
    pub low_light: bool,
    pub overexposed: bool,
    pub low_contrast: bool,
    pub method_disagreement: bool,
    pub sparse_detection: bool,
    pub dense_detection: bool,
    pub poor_focus: bool,
}

impl ScenarioFlags {
    /// Names of the raised flags, in declaration order.
    pub fn active(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.low_light {
            out.push("low_light");
        }
        if self.overexposed {
            out.push("overexposed");
        }
        if self.low_contrast {
            out.push("low_contrast");
        }
        if self.method_disagreement {
            out.push("method_disagreement");
        }
        if self.sparse_detection {
            out.push("sparse_detection");
        }
        if self.dense_detection {
            out.push("dense_detection");
        }
        if self.poor_focus {
            out.push("poor_focus");
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialAnalysis {
    pub num_regions: usize,
    pub avg_region_size: f64,
    pub largest_region_ratio: f64,
    pub fragmentation_index: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodsAgreement {
    pub coverage_std: f64,
    pub mean_confidence: f64,
    pub methods_count: usize,
    pub consistency_score: f64,
}

/// Aggregate stats of one `detect` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub method: DetectionMethod,
    pub mode: Mode,
    pub coverage_percentage: f64,
    pub confidence_score: f64,
    pub grass_pixels: u64,
    pub total_pixels: u64,
    pub scenario_flags: ScenarioFlags,
    pub component_stats: Vec<MethodStats>,
    pub fusion_weights: Vec<(MethodKind, f64)>,
    pub spatial_analysis: Option<SpatialAnalysis>,
    pub methods_agreement: Option<MethodsAgreement>,
    /// Set when the requested method was replaced by another one.
    pub fallback_from: Option<DetectionMethod>,
    pub processing_ms: f64,
}
