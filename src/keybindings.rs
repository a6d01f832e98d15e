//! Keybinding registry: maps key events to actions, with config overrides.
//!
//! Bindings are context-aware. The story list uses `Context::Global`; an
//! open prompt or the help overlay get their own tables and fall back to
//! nothing else, so typing into a prompt never triggers list commands.
use crossterm::event::{KeyCode, KeyModifiers};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Action Enum
// ============================================================================

/// All user-facing actions that can be triggered by keybindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Quit,
    NextItem,
    PrevItem,
    NextGroup,
    PrevGroup,
    GotoGroup,
    RelativeGroup,
    NextUnread,
    PrevUnread,
    NextMarked,
    PrevMarked,
    MarkRead,
    MarkUnread,
    ToggleMark,
    ClearMarks,
    OpenLink,
    InlineSearch,
    NextFilter,
    PrevFilter,
    SetFilter,
    NextGroupFilter,
    PrevGroupFilter,
    NextGroupSort,
    PrevGroupSort,
    NextTagset,
    PrevTagset,
    ToggleCollapse,
    CollapseAll,
    ExpandAll,
    ForceUpdate,
    GroupRead,
    GroupUnread,
    AllRead,
    AllUnread,
    PageDown,
    PageUp,
    ShowHelp,
    CloseHelp,
    PromptCommit,
    PromptCancel,
}

/// Every action with its config name, in help-screen order.
const ACTION_NAMES: &[(Action, &str)] = &[
    (Action::Quit, "quit"),
    (Action::NextItem, "next_item"),
    (Action::PrevItem, "prev_item"),
    (Action::NextGroup, "next_group"),
    (Action::PrevGroup, "prev_group"),
    (Action::GotoGroup, "goto_group"),
    (Action::RelativeGroup, "relative_group"),
    (Action::NextUnread, "next_unread"),
    (Action::PrevUnread, "prev_unread"),
    (Action::NextMarked, "next_marked"),
    (Action::PrevMarked, "prev_marked"),
    (Action::MarkRead, "mark_read"),
    (Action::MarkUnread, "mark_unread"),
    (Action::ToggleMark, "toggle_mark"),
    (Action::ClearMarks, "clear_marks"),
    (Action::OpenLink, "open_link"),
    (Action::InlineSearch, "inline_search"),
    (Action::NextFilter, "next_filter"),
    (Action::PrevFilter, "prev_filter"),
    (Action::SetFilter, "set_filter"),
    (Action::NextGroupFilter, "next_group_filter"),
    (Action::PrevGroupFilter, "prev_group_filter"),
    (Action::NextGroupSort, "next_group_sort"),
    (Action::PrevGroupSort, "prev_group_sort"),
    (Action::NextTagset, "next_tagset"),
    (Action::PrevTagset, "prev_tagset"),
    (Action::ToggleCollapse, "toggle_collapse"),
    (Action::CollapseAll, "collapse_all"),
    (Action::ExpandAll, "expand_all"),
    (Action::ForceUpdate, "force_update"),
    (Action::GroupRead, "group_read"),
    (Action::GroupUnread, "group_unread"),
    (Action::AllRead, "all_read"),
    (Action::AllUnread, "all_unread"),
    (Action::PageDown, "page_down"),
    (Action::PageUp, "page_up"),
    (Action::ShowHelp, "help"),
    (Action::CloseHelp, "close_help"),
    (Action::PromptCommit, "prompt_commit"),
    (Action::PromptCancel, "prompt_cancel"),
];

impl Action {
    /// Human-readable description for the help screen.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Quit => "Quit",
            Self::NextItem => "Next story",
            Self::PrevItem => "Previous story",
            Self::NextGroup => "Next group",
            Self::PrevGroup => "Previous group",
            Self::GotoGroup => "Go to group by number",
            Self::RelativeGroup => "Move by a number of groups",
            Self::NextUnread => "Next unread story",
            Self::PrevUnread => "Previous unread story",
            Self::NextMarked => "Next marked story",
            Self::PrevMarked => "Previous marked story",
            Self::MarkRead => "Mark story read",
            Self::MarkUnread => "Mark story unread",
            Self::ToggleMark => "Toggle mark",
            Self::ClearMarks => "Clear all marks",
            Self::OpenLink => "Open link in browser",
            Self::InlineSearch => "Mark stories matching a regex",
            Self::NextFilter => "Next global filter",
            Self::PrevFilter => "Previous global filter",
            Self::SetFilter => "Set global filter by name",
            Self::NextGroupFilter => "Next group filter",
            Self::PrevGroupFilter => "Previous group filter",
            Self::NextGroupSort => "Next group sort",
            Self::PrevGroupSort => "Previous group sort",
            Self::NextTagset => "Next tagset",
            Self::PrevTagset => "Previous tagset",
            Self::ToggleCollapse => "Collapse or expand group",
            Self::CollapseAll => "Collapse all groups",
            Self::ExpandAll => "Expand all groups",
            Self::ForceUpdate => "Reload every feed now",
            Self::GroupRead => "Mark group read",
            Self::GroupUnread => "Mark group unread",
            Self::AllRead => "Mark everything read",
            Self::AllUnread => "Mark everything unread",
            Self::PageDown => "Page down",
            Self::PageUp => "Page up",
            Self::ShowHelp => "Show help",
            Self::CloseHelp => "Close help",
            Self::PromptCommit => "Accept input",
            Self::PromptCancel => "Cancel input",
        }
    }

    pub fn name(self) -> &'static str {
        ACTION_NAMES
            .iter()
            .find(|(a, _)| *a == self)
            .map_or("?", |(_, n)| n)
    }
}

/// Parse an action name string (from config) into an Action enum.
fn parse_action_name(name: &str) -> Option<Action> {
    let name = name.trim().to_lowercase();
    ACTION_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(a, _)| *a)
}

// ============================================================================
// Context Enum
// ============================================================================

/// Dispatch context: determines which bindings are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    Global,
    Prompt,
    Help,
}

// ============================================================================
// Key Specification
// ============================================================================

/// A key event: code + modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySpec {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeySpec {
    pub const fn new(code: KeyCode, modifiers: KeyModifiers) -> Self {
        Self { code, modifiers }
    }

    pub const fn plain(code: KeyCode) -> Self {
        Self::new(code, KeyModifiers::NONE)
    }

    pub const fn char(c: char) -> Self {
        Self::plain(KeyCode::Char(c))
    }

    pub const fn ctrl(c: char) -> Self {
        Self::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    /// Normalizes a terminal key event. Shift is dropped for characters
    /// since the case already carries it.
    pub fn from_event(code: KeyCode, modifiers: KeyModifiers) -> Self {
        let modifiers = match code {
            KeyCode::Char(_) => modifiers.difference(KeyModifiers::SHIFT),
            _ => modifiers,
        };
        Self::new(code, modifiers)
    }
}

/// Parse a key string from config into a KeySpec.
///
/// Supported formats:
/// - Single char: "q", "j", "/"
/// - Named keys: "Enter", "Esc", "Tab", "Up", "Down", "PageUp", "Home"
/// - Modifier combos: "Ctrl+d", "Ctrl+u"
/// - Function keys: "F1" through "F12"
fn parse_key_string(s: &str) -> Option<KeySpec> {
    let s = s.trim();

    if let Some(rest) = s.strip_prefix("Ctrl+") {
        let mut chars = rest.trim().chars();
        let c = chars.next()?;
        return chars.next().is_none().then_some(KeySpec::ctrl(c));
    }

    let named = match s.to_lowercase().as_str() {
        "enter" | "return" => Some(KeyCode::Enter),
        "esc" | "escape" => Some(KeyCode::Esc),
        "tab" => Some(KeyCode::Tab),
        "up" => Some(KeyCode::Up),
        "down" => Some(KeyCode::Down),
        "left" => Some(KeyCode::Left),
        "right" => Some(KeyCode::Right),
        "backspace" => Some(KeyCode::Backspace),
        "pageup" => Some(KeyCode::PageUp),
        "pagedown" => Some(KeyCode::PageDown),
        "home" => Some(KeyCode::Home),
        "end" => Some(KeyCode::End),
        "space" => Some(KeyCode::Char(' ')),
        _ => None,
    };
    if let Some(code) = named {
        return Some(KeySpec::plain(code));
    }

    if let Some(n) = s
        .strip_prefix(|c| c == 'F' || c == 'f')
        .and_then(|rest| rest.parse::<u8>().ok())
    {
        return (1..=12).contains(&n).then_some(KeySpec::plain(KeyCode::F(n)));
    }

    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(KeySpec::char(c))
}

/// Format a KeySpec as a human-readable string for the help screen.
fn format_key(key: &KeySpec) -> String {
    let modifier = if key.modifiers.contains(KeyModifiers::CONTROL) {
        "Ctrl+"
    } else {
        ""
    };

    let key_name = match key.code {
        KeyCode::Char(' ') => "Space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Esc => "Esc".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::Up => "Up".to_string(),
        KeyCode::Down => "Down".to_string(),
        KeyCode::Left => "Left".to_string(),
        KeyCode::Right => "Right".to_string(),
        KeyCode::Backspace => "Backspace".to_string(),
        KeyCode::PageUp => "PageUp".to_string(),
        KeyCode::PageDown => "PageDown".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::F(n) => format!("F{}", n),
        _ => "?".to_string(),
    };

    format!("{}{}", modifier, key_name)
}

// ============================================================================
// Keybinding Registry
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeybindingError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("cannot parse key '{key}' for action '{action}'")]
    BadKey { action: String, key: String },
}

/// Registry of keybindings, supporting default bindings and config overrides.
///
/// The same key can map to different actions in different contexts.
#[derive(Debug, Clone)]
pub struct KeybindingRegistry {
    lookup: HashMap<(Context, KeySpec), Action>,
    /// All bindings for help screen enumeration
    bindings: Vec<(Context, KeySpec, Action)>,
}

impl KeybindingRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            lookup: HashMap::new(),
            bindings: Vec::new(),
        };
        registry.register_defaults();
        registry
    }

    fn bind(&mut self, context: Context, key: KeySpec, action: Action) {
        self.lookup.insert((context, key), action);
        self.bindings.push((context, key, action));
    }

    fn register_defaults(&mut self) {
        use Action::*;

        let global: &[(KeySpec, Action)] = &[
            (KeySpec::char('q'), Quit),
            (KeySpec::char('j'), NextItem),
            (KeySpec::plain(KeyCode::Down), NextItem),
            (KeySpec::char('k'), PrevItem),
            (KeySpec::plain(KeyCode::Up), PrevItem),
            (KeySpec::char('.'), NextUnread),
            (KeySpec::char(','), PrevUnread),
            (KeySpec::char(']'), NextGroup),
            (KeySpec::plain(KeyCode::Tab), NextGroup),
            (KeySpec::char('['), PrevGroup),
            (KeySpec::char('g'), GotoGroup),
            (KeySpec::char('G'), RelativeGroup),
            (KeySpec::char('n'), NextMarked),
            (KeySpec::char('p'), PrevMarked),
            (KeySpec::char('m'), ToggleMark),
            (KeySpec::char('M'), ClearMarks),
            (KeySpec::char('r'), MarkRead),
            (KeySpec::char('u'), MarkUnread),
            (KeySpec::plain(KeyCode::Enter), OpenLink),
            (KeySpec::char('/'), InlineSearch),
            (KeySpec::char('f'), NextFilter),
            (KeySpec::char('F'), PrevFilter),
            (KeySpec::char('='), SetFilter),
            (KeySpec::char('t'), NextGroupFilter),
            (KeySpec::char('T'), PrevGroupFilter),
            (KeySpec::char('s'), NextGroupSort),
            (KeySpec::char('S'), PrevGroupSort),
            (KeySpec::char('>'), NextTagset),
            (KeySpec::char('<'), PrevTagset),
            (KeySpec::char(' '), ToggleCollapse),
            (KeySpec::char('c'), CollapseAll),
            (KeySpec::char('C'), ExpandAll),
            (KeySpec::ctrl('r'), ForceUpdate),
            (KeySpec::char('a'), GroupRead),
            (KeySpec::char('A'), AllRead),
            (KeySpec::char('x'), GroupUnread),
            (KeySpec::char('X'), AllUnread),
            (KeySpec::plain(KeyCode::PageDown), PageDown),
            (KeySpec::ctrl('d'), PageDown),
            (KeySpec::plain(KeyCode::PageUp), PageUp),
            (KeySpec::ctrl('u'), PageUp),
            (KeySpec::char('?'), ShowHelp),
            (KeySpec::plain(KeyCode::F(1)), ShowHelp),
        ];
        for &(key, action) in global {
            self.bind(Context::Global, key, action);
        }

        self.bind(Context::Prompt, KeySpec::plain(KeyCode::Enter), PromptCommit);
        self.bind(Context::Prompt, KeySpec::plain(KeyCode::Esc), PromptCancel);
        self.bind(Context::Prompt, KeySpec::ctrl('c'), PromptCancel);

        self.bind(Context::Help, KeySpec::plain(KeyCode::Esc), CloseHelp);
        self.bind(Context::Help, KeySpec::char('?'), CloseHelp);
        self.bind(Context::Help, KeySpec::char('q'), CloseHelp);
        self.bind(Context::Help, KeySpec::char('j'), NextItem);
        self.bind(Context::Help, KeySpec::plain(KeyCode::Down), NextItem);
        self.bind(Context::Help, KeySpec::char('k'), PrevItem);
        self.bind(Context::Help, KeySpec::plain(KeyCode::Up), PrevItem);
    }

    /// Apply user overrides from config keybindings map.
    ///
    /// Keys in the map are action names (e.g., "quit", "next_item").
    /// Values are key strings (e.g., "q", "Ctrl+d", "F5"). The new key
    /// replaces every default key of that action, in the same contexts.
    pub fn apply_overrides(
        &mut self,
        overrides: &HashMap<String, String>,
    ) -> Result<(), KeybindingError> {
        // Sorted so the first error reported is stable
        let mut entries: Vec<(&String, &String)> = overrides.iter().collect();
        entries.sort();

        for (action_name, key_str) in entries {
            let action = parse_action_name(action_name)
                .ok_or_else(|| KeybindingError::UnknownAction(action_name.clone()))?;
            let key = parse_key_string(key_str).ok_or_else(|| KeybindingError::BadKey {
                action: action_name.clone(),
                key: key_str.clone(),
            })?;

            let mut contexts: Vec<Context> = self
                .bindings
                .iter()
                .filter(|(_, _, a)| *a == action)
                .map(|(c, _, _)| *c)
                .collect();
            contexts.dedup();

            self.lookup.retain(|_, a| *a != action);
            self.bindings.retain(|(_, _, a)| *a != action);

            for ctx in contexts {
                self.bind(ctx, key, action);
            }

            tracing::info!(
                action = %action_name,
                key = %key_str,
                "Applied keybinding override"
            );
        }

        Ok(())
    }

    /// Look up the action for a given key in a given context.
    pub fn action_for_key(&self, key: KeySpec, context: Context) -> Option<Action> {
        self.lookup.get(&(context, key)).copied()
    }

    /// Get all bindings for the help screen.
    ///
    /// Returns (context, key_display_string, action, description) tuples.
    pub fn all_bindings(&self) -> Vec<(Context, String, Action, &'static str)> {
        self.bindings
            .iter()
            .map(|(ctx, key, action)| (*ctx, format_key(key), *action, action.describe()))
            .collect()
    }
}

impl Default for KeybindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
