//! Reminder message templating.

/// Used for `{name}` when the counterpart's name is unknown.
pub const FALLBACK_NAME: &str = "there";

/// Fill `{name}` and `{sender}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, name: Option<&str>, sender: &str) -> String {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(FALLBACK_NAME);

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{name}") {
            out.push_str(name);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{sender}") {
            out.push_str(sender);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_placeholders() {
        assert_eq!(
            render("Hi {name}, greetings from {sender}", Some("Anna"), "Bob"),
            "Hi Anna, greetings from Bob"
        );
    }

    #[test]
    fn missing_name_falls_back() {
        assert_eq!(render("Hi {name}", None, ""), "Hi there");
        assert_eq!(render("Hi {name}", Some("  "), ""), "Hi there");
    }

    #[test]
    fn substituted_text_is_not_expanded_again() {
        assert_eq!(
            render("Hi {name}, from {sender}", Some("{sender}"), "Bob"),
            "Hi {sender}, from Bob"
        );
        assert_eq!(render("{sender}", None, "{name}"), "{name}");
    }

    #[test]
    fn other_braces_untouched() {
        assert_eq!(render("{greeting} {name}", Some("A"), "B"), "{greeting} A");
    }
}
