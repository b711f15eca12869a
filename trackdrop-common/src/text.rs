//! Text normalization for track matching
//!
//! Source catalogs spell the same track differently (curly quotes,
//! diacritics, "(Official Video)" suffixes). These helpers fold those
//! differences away so artist/title/album comparisons are stable.

/// Normalize a string for comparison: casefold, strip diacritics for
/// common Latin accented characters, replace non-alphanumerics with
/// spaces, and collapse whitespace.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = true;

    for c in s.chars().flat_map(|c| c.to_lowercase()) {
        let folded = fold_char(c);
        let c = match folded {
            Some(c) => c,
            None => continue,
        };
        if c.is_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Map an accented character to its base form. Returns `None` for
/// combining marks that should be dropped entirely.
fn fold_char(c: char) -> Option<char> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ñ' => 'n',
        'ç' => 'c',
        'ß' => 's',
        // Combining diacritical marks (decomposed input)
        '\u{0300}'..='\u{036F}' => return None,
        other => other,
    };
    Some(folded)
}

/// Remove common suffixes from track titles to improve search accuracy:
/// featuring credits, parenthetical/bracketed qualifiers, and trailing
/// "- Remastered" style markers.
pub fn clean_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut depth_paren = 0usize;
    let mut depth_bracket = 0usize;

    for c in title.chars() {
        match c {
            '(' => depth_paren += 1,
            ')' => depth_paren = depth_paren.saturating_sub(1),
            '[' => depth_bracket += 1,
            ']' => depth_bracket = depth_bracket.saturating_sub(1),
            _ if depth_paren == 0 && depth_bracket == 0 => out.push(c),
            _ => {}
        }
    }

    let mut cleaned = out.trim().to_string();
    let suffixes = [
        " - remastered",
        " - remaster",
        " - single",
        " - ep",
    ];
    let lower = cleaned.to_lowercase();
    for suffix in suffixes {
        if lower.ends_with(suffix) {
            cleaned.truncate(cleaned.len() - suffix.len());
            break;
        }
    }

    cleaned.trim().trim_end_matches('-').trim().to_string()
}

/// Replace characters that are unsafe in filenames with underscores.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}
