//! Name inflection for generated endpoint paths: `UserProfile` -> `user_profile` / `user_profiles`.

/// Convert a type name from CamelCase to snake_case. Namespace separators (`::`) become `/`.
/// e.g. "UserProfile" -> "user_profile", "Admin::User" -> "admin/user"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for (idx, segment) in s.split("::").enumerate() {
        if idx > 0 {
            out.push('/');
            prev_lower = false;
        }
        for c in segment.chars() {
            if c.is_uppercase() {
                if prev_lower {
                    out.push('_');
                }
                out.extend(c.to_lowercase());
                prev_lower = false;
            } else {
                out.push(c);
                prev_lower = c.is_alphanumeric();
            }
        }
    }
    out
}

/// English plural of the last path segment; only the common suffix rules.
/// e.g. "user" -> "users", "category" -> "categories", "box" -> "boxes", "admin/user" -> "admin/users"
pub fn pluralize(s: &str) -> String {
    let (head, word) = match s.rfind('/') {
        Some(i) => s.split_at(i + 1),
        None => ("", s),
    };
    let plural = if word.is_empty() {
        String::new()
    } else if word.ends_with('y') && !ends_with_vowel_y(word) {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| word.ends_with(suffix)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    };
    format!("{}{}", head, plural)
}

fn ends_with_vowel_y(word: &str) -> bool {
    let mut chars = word.chars().rev();
    chars.next();
    matches!(chars.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}
