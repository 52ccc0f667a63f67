use std::path::{Path, PathBuf};

use crate::domain::ChatContext;
use crate::error::{BridgeError, Result};

/// Directory (inside the worktree) that receives uploaded files
pub const INCOMING_DIR: &str = "incoming";

/// A user request as received by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub context: ChatContext,
    /// Message text; may contain a resume token
    pub text: String,
    /// Explicit project mention
    pub project: Option<String>,
    /// Explicit branch mention
    pub branch: Option<String>,
    /// Explicit engine choice
    pub engine: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl InboundRequest {
    pub fn new(context: ChatContext, text: impl Into<String>) -> Self {
        Self {
            context,
            text: text.into(),
            project: None,
            branch: None,
            engine: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// A file uploaded alongside a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Write the file into `<worktree>/incoming/`, never overwriting an existing file.
    ///
    /// Returns the path relative to the worktree.
    pub fn save_into(&self, worktree: &Path) -> Result<PathBuf> {
        let dir = worktree.join(INCOMING_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| BridgeError::io(&dir, e))?;

        let name = sanitize_file_name(&self.name);
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (name.clone(), String::new()),
        };

        let mut candidate = name;
        let mut n = 1;
        loop {
            let path = dir.join(&candidate);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    file.write_all(&self.data)
                        .map_err(|e| BridgeError::io(&path, e))?;
                    tracing::debug!(path = %path.display(), bytes = self.data.len(), "saved attachment");
                    return Ok(Path::new(INCOMING_DIR).join(candidate));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = format!("{}-{}{}", stem, n, ext);
                    n += 1;
                }
                Err(e) => return Err(BridgeError::io(&path, e)),
            }
        }
    }
}

/// Reduce an uploaded file name to a safe single path component
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_keeps_only_the_final_safe_component() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\tmp\\my file.txt"), "my_file.txt");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn save_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let first = Attachment::new("notes.md", "one").save_into(dir.path()).unwrap();
        let second = Attachment::new("notes.md", "two").save_into(dir.path()).unwrap();

        assert_eq!(first, Path::new("incoming/notes.md"));
        assert_eq!(second, Path::new("incoming/notes-1.md"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(&first)).unwrap(),
            "one"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join(&second)).unwrap(),
            "two"
        );
    }
}
