//! Color configuration for the TUI.
//!
//! The config file carries exactly eight color entries, one per [`Role`].
//! Each entry is a color number, a color name, or a `[fg, bg]` pair.
//! A lone color borrows its background from the first entry, or the
//! terminal default when it is the first entry itself.

use ratatui::style::{Color, Modifier, Style};
use serde::Deserialize;
use thiserror::Error;

/// Highest color number accepted (256-color terminals).
pub const MAX_COLOR: i64 = 255;

/// The terminal's own foreground/background.
pub const DEFAULT_COLOR: i16 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThemeError {
    #[error("colors must have {expected} entries, found {found}")]
    WrongLength { expected: usize, found: usize },

    #[error("{0} is not a valid color")]
    InvalidColor(String),

    #[error("color pair has {0} entries (at most 2)")]
    PairTooLong(usize),

    #[error("color pair is empty")]
    EmptyPair,
}

// ============================================================================
// Config Representation
// ============================================================================

/// A single color as written in the config: number or name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColorValue {
    Number(i64),
    Name(String),
}

impl std::fmt::Display for ColorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(s) => write!(f, "{s:?}"),
        }
    }
}

/// One entry of the `colors` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Single(ColorValue),
    Pair(Vec<ColorValue>),
}

impl ColorSpec {
    fn name(s: &str) -> Self {
        Self::Single(ColorValue::Name(s.to_string()))
    }

    fn pair(fg: &str, bg: &str) -> Self {
        Self::Pair(vec![
            ColorValue::Name(fg.to_string()),
            ColorValue::Name(bg.to_string()),
        ])
    }
}

/// Built-in colors, in [`Role`] order.
pub fn default_colors() -> Vec<ColorSpec> {
    vec![
        ColorSpec::name("default"),
        ColorSpec::name("blue"),
        ColorSpec::name("white"),
        ColorSpec::pair("black", "cyan"),
        ColorSpec::name("yellow"),
        ColorSpec::name("green"),
        ColorSpec::pair("black", "white"),
        ColorSpec::name("red"),
    ]
}

/// Converts a config color to a terminal color number.
pub fn convert_color(value: &ColorValue) -> Option<i16> {
    match value {
        ColorValue::Number(n) if (0..=MAX_COLOR).contains(n) => i16::try_from(*n).ok(),
        ColorValue::Number(_) => None,
        ColorValue::Name(name) => match name.to_ascii_lowercase().as_str() {
            "default" => Some(DEFAULT_COLOR),
            "black" => Some(0),
            "red" => Some(1),
            "green" => Some(2),
            "yellow" => Some(3),
            "blue" => Some(4),
            "magenta" | "pink" => Some(5),
            "cyan" => Some(6),
            "white" => Some(7),
            _ => None,
        },
    }
}

fn convert(value: &ColorValue) -> Result<i16, ThemeError> {
    convert_color(value).ok_or_else(|| ThemeError::InvalidColor(value.to_string()))
}

/// Resolves the `colors` array to `(fg, bg)` pairs.
pub fn validate_colors(colors: &[ColorSpec]) -> Result<Vec<(i16, i16)>, ThemeError> {
    if colors.len() != Role::COUNT {
        return Err(ThemeError::WrongLength {
            expected: Role::COUNT,
            found: colors.len(),
        });
    }

    let mut pairs: Vec<(i16, i16)> = Vec::with_capacity(colors.len());
    for spec in colors {
        let single = match spec {
            ColorSpec::Single(value) => Some(value),
            ColorSpec::Pair(values) => match values.as_slice() {
                [] => return Err(ThemeError::EmptyPair),
                [value] => Some(value),
                [fg, bg] => {
                    pairs.push((convert(fg)?, convert(bg)?));
                    None
                }
                more => return Err(ThemeError::PairTooLong(more.len())),
            },
        };
        if let Some(value) = single {
            let bg = pairs.first().map_or(DEFAULT_COLOR, |first| first.1);
            pairs.push((convert(value)?, bg));
        }
    }
    Ok(pairs)
}

// ============================================================================
// Palette
// ============================================================================

/// What each color entry paints, in config order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Text,
    Unread,
    Read,
    Selected,
    Marked,
    Header,
    Status,
    Notice,
}

impl Role {
    pub const COUNT: usize = 8;
}

fn terminal_color(n: i16) -> Color {
    match n {
        0 => Color::Black,
        1 => Color::Red,
        2 => Color::Green,
        3 => Color::Yellow,
        4 => Color::Blue,
        5 => Color::Magenta,
        6 => Color::Cyan,
        7 => Color::Gray,
        n => u8::try_from(n).map_or(Color::Reset, Color::Indexed),
    }
}

/// Resolved styles for every [`Role`].
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    styles: [Style; Role::COUNT],
}

impl Palette {
    /// Builds a palette from validated pairs; missing entries stay unstyled.
    pub fn from_pairs(pairs: &[(i16, i16)]) -> Self {
        let mut styles = [Style::default(); Role::COUNT];
        for (style, &(fg, bg)) in styles.iter_mut().zip(pairs) {
            *style = Style::default().fg(terminal_color(fg)).bg(terminal_color(bg));
        }
        styles[Role::Header as usize] = styles[Role::Header as usize].add_modifier(Modifier::BOLD);
        styles[Role::Unread as usize] = styles[Role::Unread as usize].add_modifier(Modifier::BOLD);
        Self { styles }
    }

    pub fn style(&self, role: Role) -> Style {
        self.styles[role as usize]
    }
}

impl Default for Palette {
    fn default() -> Self {
        // The built-in colors always validate
        let pairs = validate_colors(&default_colors()).unwrap_or_default();
        Self::from_pairs(&pairs)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(n: i64) -> ColorSpec {
        ColorSpec::Single(ColorValue::Number(n))
    }

    fn eight(first: ColorSpec, rest: ColorSpec) -> Vec<ColorSpec> {
        let mut v = vec![first];
        v.extend(std::iter::repeat_n(rest, 7));
        v
    }

    #[test]
    fn test_defaults_validate() {
        let pairs = validate_colors(&default_colors()).unwrap();
        assert_eq!(pairs.len(), 8);
        assert_eq!(pairs[0], (-1, -1));
        assert_eq!(pairs[3], (0, 6));
    }

    #[test]
    fn test_single_color_borrows_first_background() {
        let colors = eight(ColorSpec::pair("white", "blue"), num(1));
        let pairs = validate_colors(&colors).unwrap();
        assert_eq!(pairs[0], (7, 4));
        assert_eq!(pairs[1], (1, 4));
    }

    #[test]
    fn test_first_single_gets_default_background() {
        let pairs = validate_colors(&eight(num(1), num(2))).unwrap();
        assert_eq!(pairs[0], (1, -1));
        assert_eq!(pairs[7], (2, -1));
    }

    #[test]
    fn test_one_element_pair_is_single() {
        let one = ColorSpec::Pair(vec![ColorValue::Name("pink".into())]);
        let pairs = validate_colors(&eight(one, num(0))).unwrap();
        assert_eq!(pairs[0], (5, -1));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            validate_colors(&[num(1)]),
            Err(ThemeError::WrongLength {
                expected: 8,
                found: 1
            })
        );
    }

    #[test]
    fn test_invalid_colors_rejected() {
        assert!(matches!(
            validate_colors(&eight(num(256), num(0))),
            Err(ThemeError::InvalidColor(_))
        ));
        assert!(matches!(
            validate_colors(&eight(num(-1), num(0))),
            Err(ThemeError::InvalidColor(_))
        ));
        assert!(matches!(
            validate_colors(&eight(ColorSpec::name("chartreuse"), num(0))),
            Err(ThemeError::InvalidColor(_))
        ));
        let triple = ColorSpec::Pair(vec![ColorValue::Number(1); 3]);
        assert_eq!(
            validate_colors(&eight(triple, num(0))),
            Err(ThemeError::PairTooLong(3))
        );
    }

    #[test]
    fn test_names_case_insensitive() {
        assert_eq!(convert_color(&ColorValue::Name("Cyan".into())), Some(6));
        assert_eq!(convert_color(&ColorValue::Name("DEFAULT".into())), Some(-1));
    }

    #[test]
    fn test_palette_maps_colors() {
        let palette = Palette::from_pairs(&[(-1, -1), (4, 0), (200, -1)]);
        assert_eq!(palette.style(Role::Text), Style::default().fg(Color::Reset).bg(Color::Reset));
        assert_eq!(
            palette.style(Role::Unread),
            Style::default()
                .fg(Color::Blue)
                .bg(Color::Black)
                .add_modifier(Modifier::BOLD)
        );
        assert_eq!(palette.style(Role::Read).fg, Some(Color::Indexed(200)));
        assert_eq!(palette.style(Role::Status), Style::default());
    }

    #[test]
    fn test_colors_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            colors: Vec<ColorSpec>,
        }
        let w: Wrapper = toml::from_str(r#"colors = [1, "red", ["blue", "black"], [3]]"#).unwrap();
        assert_eq!(w.colors[0], num(1));
        assert_eq!(w.colors[1], ColorSpec::name("red"));
        assert_eq!(w.colors[2], ColorSpec::pair("blue", "black"));
    }
}
