//! Holon identity documents.
//!
//! A holon describes itself in a Markdown file that opens with a YAML front
//! matter block:
//!
//! ```text
//! ---
//! uuid: "abc-123"
//! given_name: "echo"
//! family_name: "Holon"
//! lang: "rust"
//! ---
//! # Echo
//! ```

use crate::{HolonError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const FRONT_MATTER_FENCE: &str = "---";

/// Identity record read from a holon's front matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HolonIdentity {
    pub uuid: String,
    pub given_name: String,
    pub family_name: String,
    pub motto: String,
    pub composer: String,
    pub clade: String,
    pub status: String,
    pub born: String,
    pub lang: String,
    pub aliases: Vec<String>,
}

impl HolonIdentity {
    /// `given_name family_name`, skipping empty parts.
    pub fn display_name(&self) -> String {
        [self.given_name.as_str(), self.family_name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Read the identity document at `path`.
pub fn parse_holon(path: impl AsRef<Path>) -> Result<HolonIdentity> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    parse_front_matter(&text).map_err(|e| match e {
        HolonError::Identity { message } => HolonError::Identity {
            message: format!("{}: {}", path.display(), message),
        },
        other => other,
    })
}

/// Parse an identity from document text.
pub fn parse_front_matter(text: &str) -> Result<HolonIdentity> {
    let mut lines = text.lines();
    if lines.next().map(str::trim_end) != Some(FRONT_MATTER_FENCE) {
        return Err(HolonError::Identity {
            message: "missing YAML front matter".to_string(),
        });
    }

    let mut yaml = String::new();
    let mut terminated = false;
    for line in lines {
        if line.trim_end() == FRONT_MATTER_FENCE {
            terminated = true;
            break;
        }
        yaml.push_str(line);
        yaml.push('\n');
    }
    if !terminated {
        return Err(HolonError::Identity {
            message: "unterminated YAML front matter".to_string(),
        });
    }

    serde_yaml::from_str(&yaml).map_err(|e| HolonError::Identity {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_holon() {
        let mut file = tempfile::Builder::new().suffix(".md").tempfile().unwrap();
        write!(
            file,
            "---\nuuid: \"abc-123\"\ngiven_name: \"test\"\nfamily_name: \"Test\"\nlang: \"rust\"\n---\n# test\n"
        )
        .unwrap();

        let id = parse_holon(file.path()).unwrap();
        assert_eq!(id.uuid, "abc-123");
        assert_eq!(id.given_name, "test");
        assert_eq!(id.lang, "rust");
        assert_eq!(id.display_name(), "test Test");
        assert!(id.aliases.is_empty());
    }

    #[test]
    fn test_parse_missing_front_matter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# No frontmatter").unwrap();

        let err = parse_holon(file.path()).unwrap_err();
        assert!(matches!(err, HolonError::Identity { .. }));
    }

    #[test]
    fn test_optional_fields_and_aliases() {
        let text = "---\nuuid: u\ngiven_name: g\nfamily_name: f\nlang: rust\n\
                    motto: \"Know thyself\"\naliases:\n  - echo\n  - ping\n---\n";
        let id = parse_front_matter(text).unwrap();
        assert_eq!(id.motto, "Know thyself");
        assert_eq!(id.aliases, vec!["echo".to_string(), "ping".to_string()]);
        assert_eq!(id.clade, "");
    }

    #[test]
    fn test_unterminated_front_matter() {
        let err = parse_front_matter("---\nuuid: u\n").unwrap_err();
        assert!(matches!(err, HolonError::Identity { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_holon(dir.path().join("absent.md")).unwrap_err();
        assert!(matches!(err, HolonError::Io { .. }));
    }
}
