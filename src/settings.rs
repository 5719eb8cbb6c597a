use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub vision: VisionSettings,
    pub cloud_parser: CloudParserSettings,
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub url: String,
    pub model: String,
    pub key: Option<String>,
    pub canvas_size: u32,
    pub timeout: Duration,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            url: "https://api.siliconflow.cn/v1/chat/completions".to_string(),
            model: "Qwen/Qwen2.5-VL-72B-Instruct".to_string(),
            key: None,
            canvas_size: 1000,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudParserSettings {
    pub url: String,
    pub key: Option<String>,
    pub enabled: bool,
    pub model_version: String,
    pub poll_interval: Duration,
    pub poll_budget: Duration,
    pub request_timeout: Duration,
}

impl Default for CloudParserSettings {
    fn default() -> Self {
        Self {
            url: "https://mineru.net".to_string(),
            key: None,
            enabled: false,
            model_version: "vlm".to_string(),
            poll_interval: Duration::from_secs(3),
            poll_budget: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CloudParserSettings {
    pub fn is_configured(&self) -> bool {
        self.enabled && self.key.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    vision: Option<VisionFile>,
    cloud_parser: Option<CloudParserFile>,
}

#[derive(Debug, Default, Deserialize)]
struct VisionFile {
    url: Option<String>,
    model: Option<String>,
    canvas_size: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudParserFile {
    url: Option<String>,
    enabled: Option<bool>,
    model_version: Option<String>,
    poll_interval_ms: Option<u64>,
    poll_budget_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    load_settings_with_env(extra_path, get_env)
}

pub fn load_settings_with_env<F>(extra_path: Option<&Path>, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();
    settings.merge_str(DEFAULT_SETTINGS_TOML, "embedded settings.toml")?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content, &path.display().to_string())?;
        }
    }

    settings.apply_env(env);
    Ok(settings)
}

impl Settings {
    fn merge_str(&mut self, content: &str, origin: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)
            .with_context(|| format!("failed to parse settings: {}", origin))?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(vision) = incoming.vision {
            if let Some(url) = non_blank(vision.url) {
                self.vision.url = url;
            }
            if let Some(model) = non_blank(vision.model) {
                self.vision.model = model;
            }
            if let Some(size) = vision.canvas_size {
                if size > 0 {
                    self.vision.canvas_size = size;
                }
            }
            if let Some(secs) = vision.timeout_secs {
                if secs > 0 {
                    self.vision.timeout = Duration::from_secs(secs);
                }
            }
        }
        if let Some(cloud) = incoming.cloud_parser {
            if let Some(url) = non_blank(cloud.url) {
                self.cloud_parser.url = url;
            }
            if let Some(enabled) = cloud.enabled {
                self.cloud_parser.enabled = enabled;
            }
            if let Some(version) = non_blank(cloud.model_version) {
                self.cloud_parser.model_version = version;
            }
            if let Some(ms) = cloud.poll_interval_ms {
                if ms > 0 {
                    self.cloud_parser.poll_interval = Duration::from_millis(ms);
                }
            }
            if let Some(ms) = cloud.poll_budget_ms {
                if ms > 0 {
                    self.cloud_parser.poll_budget = Duration::from_millis(ms);
                }
            }
            if let Some(ms) = cloud.request_timeout_ms {
                if ms > 0 {
                    self.cloud_parser.request_timeout = Duration::from_millis(ms);
                }
            }
        }
    }

    /// Credentials only ever come from the environment.
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| non_blank(env(key));
        if let Some(key) = env("SILICONFLOW_API_KEY") {
            self.vision.key = Some(key);
        }
        if let Some(url) = env("SILICONFLOW_URL") {
            self.vision.url = url;
        }
        if let Some(model) = env("SILICONFLOW_MODEL") {
            self.vision.model = model;
        }
        if let Some(key) = env("MINERU_API_KEY") {
            self.cloud_parser.key = Some(key);
        }
        if let Some(url) = env("MINERU_URL") {
            self.cloud_parser.url = url;
        }
        if let Some(enabled) = env("MINERU_ENABLED") {
            self.cloud_parser.enabled = enabled.eq_ignore_ascii_case("true");
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".diagram-crop"))
        }
    })
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
