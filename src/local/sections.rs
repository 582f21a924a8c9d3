//! Managed sections inside user-owned dotenv files.
//!
//! `vaulter export` writes resolved variables between two marker lines and
//! leaves everything outside the markers exactly as it was.

use std::collections::BTreeMap;

use super::envfile::render_lines;

/// Opening marker line.
pub const BEGIN_MARKER: &str = "# --- BEGIN VAULTER MANAGED ---";

/// Closing marker line.
pub const END_MARKER: &str = "# --- END VAULTER MANAGED ---";

/// A dotenv file split around its managed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    /// Content before the opening marker, byte for byte.
    pub before: String,
    /// Content between the markers, if a block exists.
    pub managed: Option<String>,
    /// Content after the closing marker line, byte for byte.
    pub after: String,
}

impl ManagedFile {
    /// Splits file content around the managed block.
    ///
    /// An opening marker without a closing one is treated as user content.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let Some(begin) = find_marker_line(content, BEGIN_MARKER, 0) else {
            return Self::unmanaged(content);
        };
        let body_start = line_end(content, begin);
        let Some(end) = find_marker_line(content, END_MARKER, body_start) else {
            return Self::unmanaged(content);
        };

        Self {
            before: content[..begin].to_string(),
            managed: Some(content[body_start..end].to_string()),
            after: content[line_end(content, end)..].to_string(),
        }
    }

    /// Reassembles the file with a new managed body.
    #[must_use]
    pub fn render(&self, body: &str) -> String {
        let mut out = String::with_capacity(self.before.len() + body.len() + self.after.len() + 64);
        out.push_str(&self.before);
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(BEGIN_MARKER);
        out.push('\n');
        out.push_str(body);
        if !body.is_empty() && !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(END_MARKER);
        out.push('\n');
        out.push_str(&self.after);
        out
    }

    /// File without a managed block.
    fn unmanaged(content: &str) -> Self {
        Self {
            before: content.to_string(),
            managed: None,
            after: String::new(),
        }
    }
}

/// Merges shared and service variables (service wins) into the managed block
/// of `existing`.
#[must_use]
pub fn render_env_output(
    existing: &str,
    shared: &BTreeMap<String, String>,
    service: Option<&BTreeMap<String, String>>,
) -> String {
    let mut merged = shared.clone();
    if let Some(service) = service {
        merged.extend(service.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    ManagedFile::parse(existing).render(&render_lines(&merged))
}

/// Returns the byte offset of a line equal to `marker`, searching from `from`.
fn find_marker_line(content: &str, marker: &str, from: usize) -> Option<usize> {
    let mut offset = from;
    for line in content[from..].split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == marker {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Returns the offset just past the line starting at `start`.
fn line_end(content: &str, start: usize) -> usize {
    content[start..]
        .find('\n')
        .map_or(content.len(), |i| start + i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_without_block() {
        let file = ManagedFile::parse("A=1\n");
        assert_eq!(file.before, "A=1\n");
        assert!(file.managed.is_none());
        assert!(file.after.is_empty());
    }

    #[test]
    fn test_parse_with_block() {
        let content = format!("A=1\n{BEGIN_MARKER}\nB='2'\n{END_MARKER}\nC=3\n");
        let file = ManagedFile::parse(&content);
        assert_eq!(file.before, "A=1\n");
        assert_eq!(file.managed.as_deref(), Some("B='2'\n"));
        assert_eq!(file.after, "C=3\n");
    }

    #[test]
    fn test_unterminated_block_is_user_content() {
        let content = format!("{BEGIN_MARKER}\nB=2\n");
        let file = ManagedFile::parse(&content);
        assert!(file.managed.is_none());
        assert_eq!(file.before, content);
    }

    #[test]
    fn test_render_preserves_outside_content() {
        let content = format!("# mine\nA=1 # keep\n{BEGIN_MARKER}\nOLD='x'\n{END_MARKER}\n\nZ=last");
        let output = render_env_output(&content, &vars(&[("NEW", "y")]), None);
        assert_eq!(
            output,
            format!("# mine\nA=1 # keep\n{BEGIN_MARKER}\nNEW='y'\n{END_MARKER}\n\nZ=last")
        );
    }

    #[test]
    fn test_render_appends_block_to_plain_file() {
        let output = render_env_output("A=1", &vars(&[("B", "2")]), None);
        assert_eq!(output, format!("A=1\n{BEGIN_MARKER}\nB='2'\n{END_MARKER}\n"));
    }

    #[test]
    fn test_service_overrides_shared() {
        let shared = vars(&[("LOG_LEVEL", "info"), ("REGION", "eu")]);
        let service = vars(&[("LOG_LEVEL", "debug")]);
        let output = render_env_output("", &shared, Some(&service));
        assert_eq!(
            output,
            format!("{BEGIN_MARKER}\nLOG_LEVEL='debug'\nREGION='eu'\n{END_MARKER}\n")
        );
    }

    #[test]
    fn test_render_is_stable() {
        let first = render_env_output("A=1\n", &vars(&[("B", "2")]), None);
        let second = render_env_output(&first, &vars(&[("B", "2")]), None);
        assert_eq!(first, second);
    }
}
