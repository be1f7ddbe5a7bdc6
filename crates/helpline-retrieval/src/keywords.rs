//! Keyword prompt and parsing.

/// Prompt asking the model for at most `max` comma-separated keywords.
pub fn keyword_prompt(issue: &str, max: usize) -> String {
    format!(
        "Issue: \"{issue}\"\n\nExtract at most {max} short search keywords from the help desk \
         issue above. Respond with the keywords only, separated by commas."
    )
}

/// Split a keyword list on commas, or on whitespace when there are none.
///
/// Terms are trimmed of quotes, list markers and trailing punctuation;
/// duplicates (case-insensitive) and empties are dropped; at most `max` are
/// kept, and never fewer than one when any term is present.
pub fn parse_keywords(raw: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let pieces: Vec<&str> = if raw.contains(',') {
        raw.split(',').collect()
    } else {
        raw.split_whitespace().collect()
    };

    let mut out: Vec<String> = Vec::new();
    for piece in pieces {
        let term = clean_term(piece);
        if term.is_empty() {
            continue;
        }
        if out.iter().any(|t| t.eq_ignore_ascii_case(&term)) {
            continue;
        }
        out.push(term);
        if out.len() >= max {
            break;
        }
    }
    out
}

fn clean_term(piece: &str) -> String {
    let mut t = piece.trim();
    for label in ["Keywords:", "keywords:"] {
        if let Some(rest) = t.strip_prefix(label) {
            t = rest.trim();
        }
    }

    // List markers: "2." / "2)" / "-" / "*"
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &t[digits..];
        if let Some(r) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            t = r;
        }
    }
    t = t.trim_start_matches(['-', '*']);

    t.trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c.is_whitespace())
        .to_string()
}
