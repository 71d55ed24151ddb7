use migrata_common::{Error, Result};

/// Turn a free-text migration name into a filesystem-safe slug.
///
/// The input is lower-cased and every character outside `[a-z0-9-]` is
/// dropped. Runs of dashes collapse to one and leading or trailing dashes are
/// removed. An empty result is rejected.
pub fn normalize(raw: &str) -> Result<String> {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        match c {
            'a'..='z' | '0'..='9' => slug.push(c),
            '-' if !slug.is_empty() && !slug.ends_with('-') => slug.push('-'),
            _ => {}
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        return Err(Error::InvalidName(raw.to_string()));
    }
    Ok(slug)
}
