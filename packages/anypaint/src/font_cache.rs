use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::types::FontDefinition;

/// Font faces resolved so far, keyed by the requested definition. Entries
/// are never evicted; the set is bounded by the fonts actually drawn.
pub struct FontFaceCache<B: Backend> {
    faces: FxHashMap<FontDefinition, B::FontFace>,
}

impl<B: Backend> Default for FontFaceCache<B> {
    fn default() -> Self {
        Self {
            faces: FxHashMap::default(),
        }
    }
}

impl<B: Backend> FontFaceCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached face for `font`, resolving it on a miss with the family name
    /// substituted through `config`. `None` when the backend has no match.
    pub fn face_for(
        &mut self,
        backend: &B,
        config: &EngineConfig,
        font: &FontDefinition,
    ) -> Option<B::FontFace> {
        if let Some(face) = self.faces.get(font) {
            return Some(face.clone());
        }
        let resolved = FontDefinition {
            family: config.substitute_family(&font.family).to_string(),
            ..font.clone()
        };
        match backend.resolve_font_face(&resolved) {
            Ok(face) => {
                self.faces.insert(font.clone(), face.clone());
                Some(face)
            }
            Err(err) => {
                tracing::debug!(family = %resolved.family, "font face unavailable: {err}");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}
