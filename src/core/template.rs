//! Capture-group substitution for target templates.
//!
//! References are written `$n` or `${n}` where `n` is a group index of the
//! matched pattern (`$0` is the whole match). `$$` is a literal dollar sign.
//! A group that did not participate in the match expands to the empty string.
use regex::Captures;

/// How many references of a template get substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrences {
    /// Only the first reference; later ones are copied through untouched.
    First,
    /// Every reference.
    All,
}

/// Expand `template` with the groups of `caps`.
pub fn expand(template: &str, caps: &Captures<'_>, occurrences: Occurrences) -> String {
    expand_with(template, occurrences, |index| {
        caps.get(index).map(|m| m.as_str())
    })
}

/// Expansion over any group lookup, so callers are not tied to `regex`.
pub fn expand_with<'g, F>(template: &str, occurrences: Occurrences, group: F) -> String
where
    F: Fn(usize) -> Option<&'g str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut substituted = false;

    while let Some(pos) = rest.find('$') {
        if substituted && occurrences == Occurrences::First {
            break;
        }
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        match parse_reference(after) {
            Some((index, consumed)) => {
                out.push_str(group(index).unwrap_or(""));
                rest = &after[consumed..];
                substituted = true;
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parse `n` or `{n}` at the start of `s`, returning the index and bytes consumed.
fn parse_reference(s: &str) -> Option<(usize, usize)> {
    if let Some(inner) = s.strip_prefix('{') {
        let close = inner.find('}')?;
        let index = inner[..close].parse().ok()?;
        return Some((index, close + 2));
    }
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    s[..digits].parse().ok().map(|index| (index, digits))
}
