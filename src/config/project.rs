//! The gin-vue-admin project tree: where things live, and the handful of
//! settings the launcher reads or rewrites (ports, store connection).
//!
//! `server/config.yaml` is edited through `serde_yaml::Value` so keys we do
//! not know about survive a round trip.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

use super::ConfigError;

pub const DEFAULT_FRONTEND_PORT: u16 = 8080;
pub const DEFAULT_BACKEND_PORT: u16 = 8888;
pub const MAX_STORE_DB: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_dir(&self) -> PathBuf {
        self.root.join("server")
    }

    pub fn web_dir(&self) -> PathBuf {
        self.root.join("web")
    }

    pub fn go_mod(&self) -> PathBuf {
        self.server_dir().join("go.mod")
    }

    pub fn go_sum(&self) -> PathBuf {
        self.server_dir().join("go.sum")
    }

    pub fn server_config(&self) -> PathBuf {
        self.server_dir().join("config.yaml")
    }

    pub fn package_json(&self) -> PathBuf {
        self.web_dir().join("package.json")
    }

    pub fn node_modules(&self) -> PathBuf {
        self.web_dir().join("node_modules")
    }

    pub fn env_development(&self) -> PathBuf {
        self.web_dir().join(".env.development")
    }

    pub fn env_file(&self) -> PathBuf {
        self.web_dir().join(".env")
    }

    fn read_server_yaml(&self) -> Result<Value, ConfigError> {
        let path = self.server_config();
        let data = std::fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
        serde_yaml::from_str(&data).map_err(|e| ConfigError::parse(&path, e))
    }

    fn write_server_yaml(&self, value: &Value) -> Result<(), ConfigError> {
        let path = self.server_config();
        let data = serde_yaml::to_string(value).map_err(|e| ConfigError::parse(&path, e))?;
        std::fs::write(&path, data).map_err(|e| ConfigError::io(&path, e))
    }

    /// Backend port from `system.addr`; `None` when absent or not positive.
    pub fn backend_port(&self) -> Result<Option<u16>, ConfigError> {
        let root = self.read_server_yaml()?;
        Ok(root
            .get("system")
            .and_then(|s| s.get("addr"))
            .and_then(Value::as_u64)
            .filter(|p| *p > 0 && *p <= u16::MAX as u64)
            .map(|p| p as u16))
    }

    /// Rewrite `system.addr` and point the frontend dev proxy at the new port.
    pub fn write_backend_port(&self, port: u16) -> Result<(), ConfigError> {
        let mut root = self.read_server_yaml()?;
        set_yaml(&mut root, "system", "addr", Value::Number(port.into()));
        self.write_server_yaml(&root)?;
        self.upsert_env_development("VITE_SERVER_PORT", port)
    }

    /// Frontend port, looked up in the same order the dev tooling applies:
    /// `.env.development` → `.env` → `vue.config.js` → `package.json`
    /// `scripts.serve --port`, else 8080.
    pub fn frontend_port(&self) -> u16 {
        if let Some(p) = read_env_port(&self.env_development(), &["VITE_CLI_PORT"]) {
            return p;
        }
        if let Some(p) = read_env_port(&self.env_file(), &["PORT", "VUE_APP_PORT"]) {
            return p;
        }
        if let Ok(js) = std::fs::read_to_string(self.web_dir().join("vue.config.js")) {
            if let Some(p) = vue_config_port(&js) {
                return p;
            }
        }
        if let Ok(pkg) = std::fs::read_to_string(self.package_json()) {
            if let Some(p) = package_json_serve_port(&pkg) {
                return p;
            }
        }
        DEFAULT_FRONTEND_PORT
    }

    /// Update `.env` (if present) and `.env.development` with a new frontend port.
    pub fn write_frontend_port(&self, port: u16) -> Result<(), ConfigError> {
        let env = self.env_file();
        if env.exists() {
            let content = std::fs::read_to_string(&env).map_err(|e| ConfigError::io(&env, e))?;
            let key = if has_env_key(&content, "PORT") || !has_env_key(&content, "VUE_APP_PORT") {
                "PORT"
            } else {
                "VUE_APP_PORT"
            };
            let updated = upsert_env_var(&content, key, &port.to_string());
            std::fs::write(&env, updated).map_err(|e| ConfigError::io(&env, e))?;
        }
        self.upsert_env_development("VITE_CLI_PORT", port)
    }

    fn upsert_env_development(&self, key: &str, port: u16) -> Result<(), ConfigError> {
        let path = self.env_development();
        let content = if path.exists() {
            std::fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?
        } else {
            env_development_template()
        };
        let updated = upsert_env_var(&content, key, &port.to_string());
        std::fs::write(&path, updated).map_err(|e| ConfigError::io(&path, e))
    }

    pub fn store_settings(&self) -> Result<StoreSettings, ConfigError> {
        let root = self.read_server_yaml()?;
        let redis = root.get("redis");
        let str_at = |key: &str| {
            redis
                .and_then(|r| r.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(StoreSettings {
            enabled: root
                .get("system")
                .and_then(|s| s.get("use-redis"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            addr: str_at("addr"),
            password: str_at("password"),
            db: redis.and_then(|r| r.get("db")).and_then(Value::as_u64).unwrap_or(0) as u32,
        })
    }

    pub fn write_store_settings(&self, settings: &StoreSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let mut root = self.read_server_yaml()?;
        set_yaml(&mut root, "system", "use-redis", Value::Bool(settings.enabled));
        set_yaml(&mut root, "redis", "addr", Value::String(settings.addr.clone()));
        set_yaml(&mut root, "redis", "password", Value::String(settings.password.clone()));
        set_yaml(&mut root, "redis", "db", Value::Number(settings.db.into()));
        self.write_server_yaml(&root)
    }
}

/// `redis` section of `server/config.yaml` plus the `system.use-redis` switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSettings {
    pub enabled: bool,
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: u32,
}

impl StoreSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db > MAX_STORE_DB {
            return Err(ConfigError::Invalid(format!(
                "database index {} out of range 0-{}",
                self.db, MAX_STORE_DB
            )));
        }
        Ok(())
    }
}

fn set_yaml(root: &mut Value, section: &str, key: &str, value: Value) {
    if !root.is_mapping() {
        *root = Value::Mapping(Mapping::new());
    }
    if let Some(map) = root.as_mapping_mut() {
        let section_key = Value::String(section.to_string());
        let needs_reset = !map.get(&section_key).map(Value::is_mapping).unwrap_or(false);
        if needs_reset {
            map.insert(section_key.clone(), Value::Mapping(Mapping::new()));
        }
        if let Some(section_map) = map.get_mut(&section_key).and_then(Value::as_mapping_mut) {
            section_map.insert(Value::String(key.to_string()), value);
        }
    }
}

fn env_development_template() -> String {
    format!(
        "ENV = 'development'\nVITE_CLI_PORT={}\nVITE_SERVER_PORT={}\nVITE_BASE_API=/api\nVITE_BASE_PATH=http://127.0.0.1\n",
        DEFAULT_FRONTEND_PORT, DEFAULT_BACKEND_PORT
    )
}

fn has_env_key(content: &str, key: &str) -> bool {
    let prefix = format!("{}=", key);
    content.lines().any(|l| l.trim_start().starts_with(&prefix))
}

/// Replace the first `KEY=` line, or append one. Other lines are untouched.
pub fn upsert_env_var(content: &str, key: &str, value: &str) -> String {
    let prefix = format!("{}=", key);
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    match lines.iter().position(|l| l.trim_start().starts_with(&prefix)) {
        Some(i) => lines[i] = format!("{}={}", key, value),
        None => {
            // no trailing blank line before the appended entry
            while lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
                lines.pop();
            }
            lines.push(format!("{}={}", key, value));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .parse::<u16>()
        .ok()
        .filter(|p| *p > 0)
}

fn read_env_port(path: &Path, keys: &[&str]) -> Option<u16> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        if keys.contains(&k.trim()) { parse_port(v) } else { None }
    })
}

fn vue_config_port(js: &str) -> Option<u16> {
    if !js.contains("devServer") {
        return None;
    }
    let re = Regex::new(r"\bport\s*:\s*(\d+)").ok()?;
    re.captures(js).and_then(|c| parse_port(&c[1]))
}

fn package_json_serve_port(json: &str) -> Option<u16> {
    let pkg: serde_json::Value = serde_json::from_str(json).ok()?;
    let serve = pkg.get("scripts")?.get("serve")?.as_str()?;
    let parts: Vec<&str> = serve.split_whitespace().collect();
    parts
        .iter()
        .position(|p| *p == "--port")
        .and_then(|i| parts.get(i + 1))
        .and_then(|p| parse_port(p))
}
