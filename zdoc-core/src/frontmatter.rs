//! Document header parsing
//!
//! Documents open with a `---` fenced block of `key: value` lines:
//!
//! ```text
//! ---
//! title: Borrowing in practice
//! category: rust
//! tags: [ownership, lifetimes]
//! ---
//! ```
//!
//! `title` is always required. Articles also require `category`. `tags` is
//! optional and may be written inline (`a, b`), bracketed (`[a, b]`), or as
//! `- item` lines below an empty `tags:`. Unknown keys are ignored.

/// Expected header, shown to users whose document fails validation
pub const ARTICLE_HEADER_SHAPE: &str = "---\ntitle: Your title\ncategory: Your category\ntags: [optional, tags]\n---";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontMatterError {
    #[error("the first line must be `---`")]
    MissingOpening,
    #[error("the header is not closed by a `---` line")]
    Unterminated,
    #[error("line {line} is not `key: value`: {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("the header has no `title:` field")]
    MissingTitle,
    #[error("`title:` must not be empty")]
    EmptyTitle,
    #[error("the header has no `category:` field")]
    MissingCategory,
    #[error("`category:` must not be empty")]
    EmptyCategory,
}

/// Typed header of a document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrontMatter {
    pub title: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl FrontMatter {
    /// Parse a header that carries at least a title
    pub fn parse(text: &str) -> Result<Self, FrontMatterError> {
        let fields = RawHeader::parse(text)?;

        let title = match fields.title {
            None => return Err(FrontMatterError::MissingTitle),
            Some(t) if t.is_empty() => return Err(FrontMatterError::EmptyTitle),
            Some(t) => t,
        };
        if matches!(fields.category.as_deref(), Some("")) {
            return Err(FrontMatterError::EmptyCategory);
        }

        Ok(Self {
            title,
            category: fields.category,
            tags: fields.tags,
        })
    }

    /// Parse an article header: title and category are both required
    pub fn parse_article(text: &str) -> Result<Self, FrontMatterError> {
        let header = Self::parse(text)?;
        if header.category.is_none() {
            return Err(FrontMatterError::MissingCategory);
        }
        Ok(header)
    }

    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or_default()
    }
}

/// Header for a freshly created article
pub fn article_template(title: &str, category: &str) -> String {
    format!("---\ntitle: {}\ncategory: {}\ntags: []\n---\n", title, category)
}

#[derive(Default)]
struct RawHeader {
    title: Option<String>,
    category: Option<String>,
    tags: Vec<String>,
}

impl RawHeader {
    fn parse(text: &str) -> Result<Self, FrontMatterError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text.lines().enumerate();

        match lines.next() {
            Some((_, first)) if first.trim_end() == "---" => {}
            _ => return Err(FrontMatterError::MissingOpening),
        }

        let mut header = RawHeader::default();
        let mut in_tag_list = false;

        for (i, line) in lines {
            let trimmed = line.trim();
            if trimmed == "---" {
                return Ok(header);
            }
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(item) = trimmed.strip_prefix('-') {
                if in_tag_list {
                    push_tag(&mut header.tags, item);
                    continue;
                }
                return Err(FrontMatterError::MalformedLine {
                    line: i + 1,
                    text: line.to_string(),
                });
            }

            let (key, value) = trimmed.split_once(':').ok_or_else(|| FrontMatterError::MalformedLine {
                line: i + 1,
                text: line.to_string(),
            })?;
            let value = unquote(value.trim());
            in_tag_list = false;

            match key.trim().to_ascii_lowercase().as_str() {
                "title" => header.title = Some(value.to_string()),
                "category" => header.category = Some(value.to_string()),
                "tags" | "tag" => {
                    if value.is_empty() {
                        in_tag_list = true;
                    } else {
                        let inner = value
                            .strip_prefix('[')
                            .and_then(|v| v.strip_suffix(']'))
                            .unwrap_or(value);
                        for tag in inner.split(',') {
                            push_tag(&mut header.tags, tag);
                        }
                    }
                }
                _ => {}
            }
        }

        Err(FrontMatterError::Unterminated)
    }
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner.trim();
        }
    }
    value
}

fn push_tag(tags: &mut Vec<String>, raw: &str) {
    let tag = unquote(raw.trim());
    if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_article() {
        let text = "---\ntitle: Hello World\ncategory: rust\n---\nbody";
        let header = FrontMatter::parse_article(text).unwrap();
        assert_eq!(header.title, "Hello World");
        assert_eq!(header.category(), "rust");
        assert!(header.tags.is_empty());
    }

    #[test]
    fn test_tag_forms() {
        let inline = FrontMatter::parse("---\ntitle: t\ntags: a, b\n---\n").unwrap();
        assert_eq!(inline.tags, vec!["a", "b"]);

        let bracketed = FrontMatter::parse("---\ntitle: t\ntags: [a, \"b\", a]\n---\n").unwrap();
        assert_eq!(bracketed.tags, vec!["a", "b"]);

        let listed = FrontMatter::parse("---\ntitle: t\ntags:\n  - a\n  - b\ncategory: c\n---\n").unwrap();
        assert_eq!(listed.tags, vec!["a", "b"]);
        assert_eq!(listed.category(), "c");
    }

    #[test]
    fn test_quoted_values_and_unknown_keys() {
        let header = FrontMatter::parse("---\ndate: 2024-01-01 10:00:00\ntitle: \"Quoted: yes\"\n---\n").unwrap();
        assert_eq!(header.title, "Quoted: yes");
    }

    #[test]
    fn test_errors() {
        assert_eq!(FrontMatter::parse("title: x\n"), Err(FrontMatterError::MissingOpening));
        assert_eq!(FrontMatter::parse(""), Err(FrontMatterError::MissingOpening));
        assert_eq!(FrontMatter::parse("---\ntitle: x\n"), Err(FrontMatterError::Unterminated));
        assert_eq!(FrontMatter::parse("---\ncategory: c\n---\n"), Err(FrontMatterError::MissingTitle));
        assert_eq!(FrontMatter::parse("---\ntitle:\n---\n"), Err(FrontMatterError::EmptyTitle));
        assert_eq!(
            FrontMatter::parse_article("---\ntitle: x\n---\n"),
            Err(FrontMatterError::MissingCategory)
        );
        assert_eq!(
            FrontMatter::parse("---\ntitle: x\ncategory:  \n---\n"),
            Err(FrontMatterError::EmptyCategory)
        );
        assert!(matches!(
            FrontMatter::parse("---\ntitle: x\njust words\n---\n"),
            Err(FrontMatterError::MalformedLine { line: 3, .. })
        ));
    }

    #[test]
    fn test_template_parses() {
        let text = article_template("notes", "rust");
        let header = FrontMatter::parse_article(&text).unwrap();
        assert_eq!(header.title, "notes");
        assert_eq!(header.category(), "rust");
    }
}
