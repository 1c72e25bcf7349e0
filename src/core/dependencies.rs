use std::path::PathBuf;
use std::process::Stdio;

const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

#[derive(Debug, Clone)]
pub struct DependencyStatus {
    pub name: String,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

impl DependencyStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

fn managed_bin_dir() -> Option<PathBuf> {
    crate::core::paths::managed_bin_dir()
}

fn bin_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

fn version_flag_for(tool: &str) -> &'static str {
    match tool {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    }
}

pub async fn find_tool(tool: &str) -> Option<PathBuf> {
    let timer_start = std::time::Instant::now();
    let name = bin_name(tool);
    let version_flag = version_flag_for(tool);

    if let Ok(status) = crate::core::process::command(&name)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            tracing::debug!("[perf] find_tool({}) took {:?}", tool, timer_start.elapsed());
            return Some(PathBuf::from(&name));
        }
    }

    let managed = managed_bin_dir()?.join(&name);
    tracing::debug!("[perf] find_tool({}) took {:?}", tool, timer_start.elapsed());
    managed.exists().then_some(managed)
}

/// First line of `<tool> --version`, reduced to the version token for ffmpeg.
pub async fn check_version(tool: &str) -> Option<String> {
    let path = find_tool(tool).await?;
    let output = crate::core::process::command(&path)
        .arg(version_flag_for(tool))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version_line(tool, stdout.lines().next().unwrap_or(""))
}

fn parse_version_line(tool: &str, first_line: &str) -> Option<String> {
    if tool == "ffmpeg" || tool == "ffprobe" {
        first_line.split_whitespace().nth(2).map(|s| s.to_string())
    } else {
        let trimmed = first_line.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

pub async fn ffmpeg_status() -> DependencyStatus {
    DependencyStatus {
        name: "ffmpeg".into(),
        path: find_tool("ffmpeg").await,
        version: check_version("ffmpeg").await,
    }
}

/// Locates a Chrome/Chromium binary, preferring an explicitly configured one.
pub async fn browser_status(configured: Option<&PathBuf>) -> DependencyStatus {
    if let Some(path) = configured {
        return DependencyStatus {
            name: "chrome".into(),
            path: path.exists().then(|| path.clone()),
            version: None,
        };
    }
    for candidate in BROWSER_CANDIDATES {
        if let Some(path) = find_tool(candidate).await {
            return DependencyStatus {
                name: (*candidate).into(),
                path: Some(path),
                version: check_version(candidate).await,
            };
        }
    }
    DependencyStatus {
        name: "chrome".into(),
        path: None,
        version: None,
    }
}
