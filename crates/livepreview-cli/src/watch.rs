//! Polling file watcher feeding source text into the preview.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Shown when the watched file is empty.
pub const DEFAULT_COMPONENT: &str = r#"fn App(props) {
    <div className="app">
        <h1>Hello, edit me!</h1>
        <p>Save the file to see your changes.</p>
    </div>
}

render(<App />);
"#;

/// Substitute the built-in component for blank source.
pub fn source_or_default(text: String) -> String {
    if text.trim().is_empty() {
        DEFAULT_COMPONENT.to_string()
    } else {
        text
    }
}

/// Watches one file by polling its modification time.
pub struct SourceWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl SourceWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_modified: modified(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents, or the default component if the file is empty.
    pub fn read(&self) -> Result<String> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read file: {}", self.path.display()))?;
        Ok(source_or_default(text))
    }

    /// New contents if the file changed since the last poll.
    pub fn poll(&mut self) -> Option<Result<String>> {
        let current = modified(&self.path);
        if current == self.last_modified {
            return None;
        }
        self.last_modified = current;
        Some(self.read())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
