use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_STORAGE_BUCKET: &str = "writercoach-submissions";
pub const DEFAULT_DIGEST_FUNCTION: &str = "progress_digest";
pub const SETTINGS_FILE: &str = "writercoach.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub service_url: Option<String>,
    pub service_anon_key: Option<String>,
    pub storage_bucket: String,
    pub digest_function: String,
    pub session_path: PathBuf,
    pub redirect_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: None,
            service_anon_key: None,
            storage_bucket: DEFAULT_STORAGE_BUCKET.into(),
            digest_function: DEFAULT_DIGEST_FUNCTION.into(),
            session_path: default_session_path(),
            redirect_url: None,
        }
    }
}

/// Endpoint and public key, present only when both were configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub service_url: String,
    pub anon_key: String,
}

impl Settings {
    pub fn credentials(&self) -> Option<ServiceCredentials> {
        let service_url = self.service_url.as_deref()?;
        let anon_key = self.service_anon_key.as_deref()?;
        Some(ServiceCredentials {
            service_url: service_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the flat TOML file at `path`, then environment overrides
/// looked up through `env`.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = non_blank(file_cfg.get("service_url").cloned()) {
                    settings.service_url = Some(v);
                }
                if let Some(v) = non_blank(file_cfg.get("service_anon_key").cloned()) {
                    settings.service_anon_key = Some(v);
                }
                if let Some(v) = non_blank(file_cfg.get("storage_bucket").cloned()) {
                    settings.storage_bucket = v;
                }
                if let Some(v) = non_blank(file_cfg.get("digest_function").cloned()) {
                    settings.digest_function = v;
                }
                if let Some(v) = non_blank(file_cfg.get("session_path").cloned()) {
                    settings.session_path = PathBuf::from(v);
                }
                if let Some(v) = non_blank(file_cfg.get("redirect_url").cloned()) {
                    settings.redirect_url = Some(v);
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable settings file: {err}");
            }
        }
    }

    if let Some(v) = non_blank(env("SUPABASE_URL")) {
        settings.service_url = Some(v);
    }
    if let Some(v) = non_blank(env("WRITERCOACH_SERVICE_URL")) {
        settings.service_url = Some(v);
    }

    if let Some(v) = non_blank(env("SUPABASE_ANON_KEY")) {
        settings.service_anon_key = Some(v);
    }
    if let Some(v) = non_blank(env("WRITERCOACH_SERVICE_ANON_KEY")) {
        settings.service_anon_key = Some(v);
    }

    if let Some(v) = non_blank(env("WRITERCOACH_STORAGE_BUCKET")) {
        settings.storage_bucket = v;
    }
    if let Some(v) = non_blank(env("WRITERCOACH_DIGEST_FUNCTION")) {
        settings.digest_function = v;
    }
    if let Some(v) = non_blank(env("WRITERCOACH_SESSION_PATH")) {
        settings.session_path = PathBuf::from(v);
    }
    if let Some(v) = non_blank(env("WRITERCOACH_REDIRECT_URL")) {
        settings.redirect_url = Some(v);
    }

    settings
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_session_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("writercoach")
        .join("session.json")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
