//! Engine configuration.
//!
//! Defaults can be overridden from the environment with
//! [`EngineConfig::from_env`]:
//!
//! - `ANYPAINT_VERBOSE=1|true` enables per-call trace output.
//! - `ANYPAINT_DISABLE_DASH_TILES=1|true` strokes dashed polylines through the
//!   generic geometry path instead of pre-rendered dash tiles.
//! - `ANYPAINT_TRANSLUCENT=1|true` treats the target as a translucent
//!   top-level window.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target is a translucent top-level window: layers must not be
    /// initialized from the background and text uses grayscale antialiasing.
    pub translucent_target: bool,
    /// Draw dashed polylines with one line call per segment using a
    /// pre-rendered dash tile.
    pub dash_tile_optimization: bool,
    pub verbose: bool,
    /// Font family aliases applied before resolving a font face.
    pub font_substitutes: FxHashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            translucent_target: false,
            dash_tile_optimization: true,
            verbose: false,
            font_substitutes: default_font_substitutes(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env_flag("ANYPAINT_VERBOSE") {
            config.verbose = true;
        }
        if env_flag("ANYPAINT_DISABLE_DASH_TILES") {
            config.dash_tile_optimization = false;
        }
        if env_flag("ANYPAINT_TRANSLUCENT") {
            config.translucent_target = true;
        }
        config
    }

    pub fn with_translucent_target(mut self, translucent: bool) -> Self {
        self.translucent_target = translucent;
        self
    }

    pub fn with_font_substitute(mut self, family: &str, substitute: &str) -> Self {
        self.font_substitutes
            .insert(family.to_ascii_lowercase(), substitute.to_string());
        self
    }

    /// Family name after alias substitution. Lookup is case-insensitive.
    pub fn substitute_family<'a>(&'a self, family: &'a str) -> &'a str {
        let lower = family.to_ascii_lowercase();
        match self.font_substitutes.get(&lower) {
            Some(sub) => sub.as_str(),
            None => family,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_font_substitutes() -> FxHashMap<String, String> {
    [
        ("", "Segoe UI"),
        ("monospace", "Consolas"),
        ("serif", "Times New Roman"),
        ("sans-serif", "Segoe UI"),
        ("system-ui", "Segoe UI"),
        ("cursive", "Comic Sans MS"),
        ("fantasy", "Segoe UI"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
