//! PII guard for free-form event labels.
//!
//! Only email-shaped substrings are detected: a non-empty run before `@`,
//! and a run after it holding a `.` with at least one character on each
//! side. Whitespace and a second `@` end a run.

/// Returns `true` when `text` contains an email-shaped substring.
pub fn contains_email(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c != '@' {
            continue;
        }
        if i == 0 || !is_address_char(chars[i - 1]) {
            continue;
        }

        let domain_len = chars[i + 1..]
            .iter()
            .take_while(|c| is_address_char(**c))
            .count();
        let domain = &chars[i + 1..i + 1 + domain_len];

        let has_inner_dot = domain
            .iter()
            .enumerate()
            .any(|(pos, &d)| d == '.' && pos >= 1 && pos + 1 < domain.len());
        if has_inner_dot {
            return true;
        }
    }
    false
}

fn is_address_char(c: char) -> bool {
    !c.is_whitespace() && c != '@'
}
