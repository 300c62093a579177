use std::borrow::Cow;

fn is_stripped(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// Remove control characters and ANSI escape sequences, keeping tab,
/// newline and carriage return.
///
/// Feed text ends up on the terminal, so CSI (`ESC [ ... final`) and OSC
/// (`ESC ] ... BEL` or `ESC ] ... ESC \`) sequences are dropped whole.
/// Returns the input unchanged when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            if !is_stripped(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // parameter and intermediate bytes run until a final byte in @..=~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{07}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}

/// Shorten `s` to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    Cow::Owned(format!("{kept}..."))
}
