use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Display width of `s` in terminal columns (CJK and emoji count as two).
///
/// ```
/// use tagreel::util::display_width;
///
/// assert_eq!(display_width("Hello"), 5);
/// assert_eq!(display_width("你好"), 4);
/// ```
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

fn char_width(c: char) -> usize {
    UnicodeWidthChar::width(c).unwrap_or(0)
}

/// Truncates `s` to at most `max_width` columns, ending in "..." when cut.
///
/// Widths too narrow for a character plus the ellipsis get as many whole
/// characters as fit, with no ellipsis. Returns borrowed text when nothing
/// was cut.
///
/// ```
/// use tagreel::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }
    if max_width <= ELLIPSIS_WIDTH {
        return Cow::Owned(take_width(s, max_width).0.to_string());
    }
    let (head, _) = take_width(s, max_width - ELLIPSIS_WIDTH);
    Cow::Owned(format!("{head}{ELLIPSIS}"))
}

/// Longest prefix of `s` fitting in `width` columns, plus its width.
fn take_width(s: &str, width: usize) -> (&str, usize) {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        let w = char_width(c);
        if used + w > width {
            return (&s[..idx], used);
        }
        used += w;
    }
    (s, used)
}

/// Word-wraps `s` into lines of at most `width` columns.
///
/// Words longer than a line are split. Runs of whitespace collapse to one
/// space. An empty or blank input yields no lines.
///
/// ```
/// use tagreel::util::wrap_to_width;
///
/// assert_eq!(wrap_to_width("the quick brown fox", 9), vec!["the quick", "brown fox"]);
/// ```
pub fn wrap_to_width(s: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_width = 0;

    for word in s.split_whitespace() {
        let mut word = word;
        let mut word_width = display_width(word);

        if line_width > 0 && line_width + 1 + word_width <= width {
            line.push(' ');
            line.push_str(word);
            line_width += 1 + word_width;
            continue;
        }
        if line_width > 0 {
            lines.push(std::mem::take(&mut line));
            line_width = 0;
        }
        // Hard-split words wider than a whole line
        while word_width > width {
            let (head, head_width) = take_width(word, width);
            if head.is_empty() {
                // A single character wider than the line; emit it alone
                let end = word.chars().next().map_or(word.len(), char::len_utf8);
                lines.push(word[..end].to_string());
                word = &word[end..];
            } else {
                lines.push(head.to_string());
                word = &word[head.len()..];
                word_width -= head_width;
                continue;
            }
            word_width = display_width(word);
        }
        if !word.is_empty() {
            line.push_str(word);
            line_width = word_width;
        }
    }
    if line_width > 0 {
        lines.push(line);
    }
    lines
}

fn is_stripped(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// Strips terminal control characters and ANSI escape sequences.
///
/// Feed titles and summaries are attacker-controlled text that ends up on the
/// terminal. CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`) sequences are
/// removed whole, other C0 controls and DEL byte by byte. Tab, newline and
/// carriage return survive. Clean input is returned borrowed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| is_stripped(b)) {
        return Cow::Borrowed(s);
    }

    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        match bytes[i] {
            0x1b if bytes.get(i + 1) == Some(&b'[') => {
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            }
            0x1b if bytes.get(i + 1) == Some(&b']') => {
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            b if is_stripped(b) => i += 1,
            _ => {
                let start = i;
                while i < len && !is_stripped(bytes[i]) {
                    i += 1;
                }
                // Only ASCII bytes stop the run, so the slice is valid UTF-8
                out.push_str(&s[start..i]);
            }
        }
    }

    Cow::Owned(out)
}
