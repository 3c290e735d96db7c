//! External toolchain renderer.
//!
//! The in-process guest covers the edit loop. For a full build, a file set
//! is written to a scratch directory and handed to a real dev server
//! (React + Vite by default). The server is started in the background and
//! reports its progress as [`ToolchainEvent`]s, ending with the first local
//! URL it prints.

use crate::config::ToolchainSettings;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, LazyLock, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Relative path → file contents.
pub type FileSet = BTreeMap<String, String>;

/// Entry file of [`react_vite_template`].
pub const REACT_VITE_ENTRY: &str = "src/App.jsx";

static ANSI_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").ok());

static LOCAL_URL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\])(?::\d+)?[^\s]*").ok()
});

/// Progress of a launched dev server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolchainEvent {
    Status(String),
    /// The server printed a local URL. Sent at most once.
    Ready(String),
    Failed(String),
}

/// Something that can turn a file set into a live URL.
pub trait ToolchainRenderer {
    fn launch(&mut self, files: &FileSet, entry: &str) -> Result<DevServer>;
}

/// Runs the configured install and dev commands in a scratch directory.
#[derive(Clone, Debug, Default)]
pub struct DevServerRenderer {
    settings: ToolchainSettings,
}

impl DevServerRenderer {
    pub fn new(settings: ToolchainSettings) -> Self {
        Self { settings }
    }
}

impl ToolchainRenderer for DevServerRenderer {
    fn launch(&mut self, files: &FileSet, entry: &str) -> Result<DevServer> {
        if !files.contains_key(entry) {
            return Err(Error::Toolchain(format!(
                "Entry '{}' is not part of the file set",
                entry
            )));
        }
        if self.settings.dev.is_empty() {
            return Err(Error::Toolchain("No dev command configured".to_string()));
        }

        let dir = tempfile::Builder::new().prefix("livepreview-").tempdir()?;
        write_files(dir.path(), files)?;
        log::info!(
            "[TOOLCHAIN] Wrote {} files to {}",
            files.len(),
            dir.path().display()
        );

        let (events_tx, events_rx) = unbounded();
        let slot = Arc::new(Mutex::new(ProcessSlot::default()));
        let job = LaunchJob {
            root: dir.path().to_path_buf(),
            settings: self.settings.clone(),
            events: events_tx,
            slot: slot.clone(),
        };
        thread::Builder::new()
            .name("toolchain-launch".to_string())
            .spawn(move || job.run())
            .map_err(|e| Error::Toolchain(format!("Failed to spawn launcher: {}", e)))?;

        Ok(DevServer {
            dir,
            events: events_rx,
            slot,
            url: None,
        })
    }
}

/// A dev server started by [`DevServerRenderer`].
///
/// The process is killed and the scratch directory removed on drop.
pub struct DevServer {
    dir: TempDir,
    events: Receiver<ToolchainEvent>,
    slot: Arc<Mutex<ProcessSlot>>,
    url: Option<String>,
}

impl DevServer {
    /// Scratch directory holding the file set.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn events(&self) -> &Receiver<ToolchainEvent> {
        &self.events
    }

    /// URL reported by the server, once [`wait_ready`](Self::wait_ready)
    /// has seen it.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Block until the server prints its URL, fails, or `timeout` passes.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(ToolchainEvent::Status(status)) => {
                    log::info!("[TOOLCHAIN] {}", status);
                }
                Ok(ToolchainEvent::Ready(url)) => {
                    self.url = Some(url.clone());
                    return Ok(url);
                }
                Ok(ToolchainEvent::Failed(message)) => return Err(Error::Toolchain(message)),
                Err(_) => {
                    return Err(Error::Toolchain(format!(
                        "Dev server did not report a URL within {}",
                        humantime::format_duration(timeout)
                    )))
                }
            }
        }
    }

    /// Kill the dev server if it is running.
    pub fn stop(&mut self) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.stopped = true;
        if let Some(mut child) = slot.child.take() {
            log::info!("[TOOLCHAIN] Stopping dev server");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct ProcessSlot {
    stopped: bool,
    child: Option<Child>,
}

struct LaunchJob {
    root: std::path::PathBuf,
    settings: ToolchainSettings,
    events: Sender<ToolchainEvent>,
    slot: Arc<Mutex<ProcessSlot>>,
}

impl LaunchJob {
    fn run(self) {
        if let Err(message) = self.install().and_then(|()| self.serve()) {
            log::warn!("[TOOLCHAIN] {}", message);
            let _ = self.events.send(ToolchainEvent::Failed(message));
        }
    }

    fn status(&self, status: &str) {
        let _ = self.events.send(ToolchainEvent::Status(status.to_string()));
    }

    fn install(&self) -> std::result::Result<(), String> {
        let Some((program, args)) = self.settings.install.split_first() else {
            return Ok(());
        };
        self.status("Installing dependencies");
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| format!("Failed to run '{}': {}", program, e))?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            log::debug!("[TOOLCHAIN] [install] {}", line);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "Install command failed ({}): {}",
                output.status,
                strip_ansi(stderr.trim())
            ));
        }
        Ok(())
    }

    fn serve(&self) -> std::result::Result<(), String> {
        let Some((program, args)) = self.settings.dev.split_first() else {
            return Err("No dev command configured".to_string());
        };
        self.status("Starting dev server");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("Failed to start '{}': {}", program, e))?;

        let (line_tx, line_rx) = unbounded();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx);
        }

        {
            let mut slot = match self.slot.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.stopped {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(());
            }
            slot.child = Some(child);
        }

        let mut ready = false;
        for line in line_rx.iter() {
            log::debug!("[TOOLCHAIN] [dev] {}", line);
            if ready {
                continue;
            }
            if let Some(url) = extract_local_url(&line) {
                log::info!("[TOOLCHAIN] Dev server ready at {}", url);
                ready = true;
                let _ = self.events.send(ToolchainEvent::Ready(url));
            }
        }

        if ready {
            log::info!("[TOOLCHAIN] Dev server output closed");
            Ok(())
        } else {
            Err("Dev server exited before reporting a URL".to_string())
        }
    }
}

/// Stream `reader` line by line, ANSI codes stripped, until it closes.
fn forward_lines<R: Read + Send + 'static>(reader: R, tx: Sender<String>) {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(std::result::Result::ok) {
            if tx.send(strip_ansi(&line)).is_err() {
                break;
            }
        }
    });
}

fn write_files(root: &Path, files: &FileSet) -> Result<()> {
    for (relative, contents) in files {
        let path = Path::new(relative);
        let safe = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || relative.is_empty() {
            return Err(Error::Toolchain(format!(
                "File path '{}' must stay inside the project",
                relative
            )));
        }
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, contents)?;
    }
    Ok(())
}

pub fn strip_ansi(text: &str) -> String {
    match ANSI_PATTERN.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// First local `http(s)://` URL in a line of dev-server output.
pub fn extract_local_url(line: &str) -> Option<String> {
    let clean = strip_ansi(line);
    LOCAL_URL_PATTERN
        .as_ref()?
        .find(&clean)
        .map(|m| m.as_str().to_string())
}

/// Default React + Vite project with `app_source` as `src/App.jsx`.
pub fn react_vite_template(app_source: Option<&str>) -> FileSet {
    let package = serde_json::json!({
        "name": "react-app",
        "version": "1.0.0",
        "private": true,
        "scripts": { "dev": "vite" },
        "dependencies": {
            "react": "^18.2.0",
            "react-dom": "^18.2.0"
        },
        "devDependencies": {
            "vite": "^4.0.0",
            "@vitejs/plugin-react": "^4.0.0"
        }
    });
    let package_json =
        serde_json::to_string_pretty(&package).unwrap_or_else(|_| package.to_string());

    let app = app_source.map(str::to_string).unwrap_or_else(|| {
        "import React from 'react';\n\n\
         function App() {\n  return <h1>Hello from React + Vite!</h1>;\n}\n\n\
         export default App;\n"
            .to_string()
    });

    let mut files = FileSet::new();
    files.insert("package.json".to_string(), package_json);
    files.insert(
        "index.html".to_string(),
        "<!DOCTYPE html>\n<html>\n  <head><title>React Vite App</title></head>\n  <body>\n    \
         <div id=\"root\"></div>\n    <script type=\"module\" src=\"/src/main.jsx\"></script>\n  \
         </body>\n</html>\n"
            .to_string(),
    );
    files.insert(
        "vite.config.js".to_string(),
        "import { defineConfig } from 'vite';\nimport react from '@vitejs/plugin-react';\n\n\
         export default defineConfig({\n  plugins: [react()],\n});\n"
            .to_string(),
    );
    files.insert(
        "src/main.jsx".to_string(),
        "import React from 'react';\nimport ReactDOM from 'react-dom/client';\n\
         import App from './App';\n\n\
         ReactDOM.createRoot(document.getElementById('root')).render(<App />);\n"
            .to_string(),
    );
    files.insert(REACT_VITE_ENTRY.to_string(), app);
    files
}
