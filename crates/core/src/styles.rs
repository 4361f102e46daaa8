//! Fixed catalog of sticker styles.
//!
//! A style carries its own prompt template. When a submission names a style,
//! the provider receives the template instead of the caller's prompt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rendering style offered to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Ios,
    Pixel,
    Lego,
    Snoopy,
}

/// Catalog entry describing a style.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDefinition {
    pub id: Style,
    pub name: &'static str,
    pub preview_url: &'static str,
    /// First 100 characters of the template, for display.
    pub description: String,
}

const IOS_PROMPT: &str = "Study the Apple iOS emoji look and turn the people in the photo into 3D sticker avatars in that style. \
Preserve body shape, face shape, skin tone, facial features and expression. Keep accessories, hairstyle, clothing and pose exactly as photographed. \
Remove the background entirely so it is fully transparent, leaving only the full figures, so the result reads as an official iOS emoji sticker.";

const PIXEL_PROMPT: &str = "Turn the people in this photo into a die-cut sticker drawn as retro pixel art. \
Keep their poses, expressions, clothing and accessories, rendered with a blocky pixelated look, a limited palette and a visible grid. \
Remove the background entirely so it is fully transparent, with clean die-cut edges.";

const LEGO_PROMPT: &str = "Turn the people in this photo into LEGO minifigure stickers. \
Keep their poses, expressions, clothing and accessories, rendered with glossy plastic surfaces and the blocky features of classic minifigures. \
Remove the background entirely so it is fully transparent, with clean professional die-cut edges.";

const SNOOPY_PROMPT: &str = "Study the Peanuts comic strip look and turn the person in the photo into a sticker avatar in that style. \
Preserve body shape, face shape, skin tone, facial features and expression. Keep accessories, hairstyle, clothing and pose unchanged. \
Remove the background and include only the full figure so the result reads as an official Peanuts character.";

impl Style {
    pub const ALL: [Style; 4] = [Style::Ios, Style::Pixel, Style::Lego, Style::Snoopy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Ios => "ios",
            Style::Pixel => "pixel",
            Style::Lego => "lego",
            Style::Snoopy => "snoopy",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Style::Ios => "iOS Sticker",
            Style::Pixel => "Pixel Art",
            Style::Lego => "LEGO",
            Style::Snoopy => "Snoopy",
        }
    }

    /// Prompt sent to the provider in place of the caller's prompt.
    pub fn prompt_template(&self) -> &'static str {
        match self {
            Style::Ios => IOS_PROMPT,
            Style::Pixel => PIXEL_PROMPT,
            Style::Lego => LEGO_PROMPT,
            Style::Snoopy => SNOOPY_PROMPT,
        }
    }

    pub fn preview_url(&self) -> &'static str {
        match self {
            Style::Ios => "/styles/ios.png",
            Style::Pixel => "/styles/pixel.png",
            Style::Lego => "/styles/lego.png",
            Style::Snoopy => "/styles/snoopy.png",
        }
    }

    pub fn definition(&self) -> StyleDefinition {
        let description: String = self.prompt_template().chars().take(100).collect();
        StyleDefinition {
            id: *self,
            name: self.display_name(),
            preview_url: self.preview_url(),
            description: format!("{}...", description),
        }
    }
}

/// The whole catalog in display order.
pub fn catalog() -> Vec<StyleDefinition> {
    Style::ALL.iter().map(Style::definition).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStyle(pub String);

impl fmt::Display for UnknownStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Style::ALL.iter().map(Style::as_str).collect();
        write!(
            f,
            "unknown style '{}', expected one of: {}",
            self.0,
            names.join(", ")
        )
    }
}

impl std::error::Error for UnknownStyle {}

impl FromStr for Style {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Style::ALL
            .iter()
            .copied()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
