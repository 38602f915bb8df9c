//! Client version comparison for `update`

/// Version of this build
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// Numeric dotted comparison; missing components count as zero
pub fn is_newer(published: &str, current: &str) -> bool {
    let published = components(published);
    let current = components(current);
    let len = published.len().max(current.len());
    for i in 0..len {
        let p = published.get(i).copied().unwrap_or(0);
        let c = current.get(i).copied().unwrap_or(0);
        if p != c {
            return p > c;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(is_newer("0.10.0", "0.9.3"));
        assert!(!is_newer("0.9.3", "0.10.0"));
    }

    #[test]
    fn test_equal_and_padded() {
        assert!(!is_newer("1.2", "1.2.0"));
        assert!(is_newer("1.2.1", "1.2"));
        assert!(!is_newer("v1.2.0", "1.2.0"));
    }

    #[test]
    fn test_suffixes_are_ignored() {
        assert!(is_newer("1.3.0-beta", "1.2.9"));
        assert!(!is_newer("garbage", "0.1.0"));
    }
}
