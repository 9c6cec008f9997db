//! Style presets and the instruction sent with each one.

use std::fmt;

/// Instruction table, indexed by [`Style`].
const ORIGINAL_INSTRUCTION: &str =
    "Convert this image into a clean black-and-white colouring-book outline, preserving the original style.";
const ANIME_INSTRUCTION: &str = "Convert this image into ANIME-style black-and-white line art suitable for a colouring book. \
     Keep outlines bold and expressive.";
const GHIBLI_INSTRUCTION: &str =
    "Convert this image into a STUDIO GHIBLI-inspired black-and-white colouring-book outline with gentle, whimsical lines.";

/// A named visual preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    #[default]
    Original,
    Anime,
    Ghibli,
}

impl Style {
    /// Resolve a requested style key.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace, so a form field sent as
    /// `" anime\n"` still selects [`Style::Anime`]. A missing, empty or unrecognised key yields
    /// [`Style::Original`]; this is never an error.
    pub fn resolve(key: Option<&str>) -> Self {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Style::Original;
        };

        match key.to_lowercase().as_str() {
            "anime" => Style::Anime,
            "ghibli" => Style::Ghibli,
            _ => Style::Original,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Original => "original",
            Style::Anime => "anime",
            Style::Ghibli => "ghibli",
        }
    }

    /// The natural-language instruction sent to the generation service.
    pub fn instruction(&self) -> &'static str {
        match self {
            Style::Original => ORIGINAL_INSTRUCTION,
            Style::Anime => ANIME_INSTRUCTION,
            Style::Ghibli => GHIBLI_INSTRUCTION,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
