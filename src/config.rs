use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "HPI_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zsh: Option<HistoryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bash: Option<HistoryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttt: Option<HistoryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_watcher: Option<WindowWatcherConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commits: Option<CommitsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browsing: Option<BrowsingConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Backups matched by glob plus the file the tool is still writing to.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub export_path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WindowWatcherConfig {
    pub export_path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_file: Option<String>,
    /// Applications never grouped into sessions.
    pub force_individual: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CommitsConfig {
    /// Directories searched for git repositories.
    pub roots: Vec<String>,
    /// Author emails considered "mine". Empty keeps every commit.
    pub emails: Vec<String>,
    pub workers: usize,
}

impl Default for CommitsConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            emails: Vec::new(),
            workers: 4,
        }
    }
}

/// Browser history databases.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BrowsingConfig {
    /// Backed-up copies, dated, never modified once written.
    pub export_path: Vec<String>,
    /// Databases the browsers are still writing to.
    pub live_databases: Vec<String>,
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        Ok(dirs::config_dir()
            .context("Could not find config directory")?
            .join("hpi")
            .join("config.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    /// The config on disk, or the defaults when there is none yet.
    pub fn load_or_default() -> Result<Config> {
        Ok(Self::load()?.unwrap_or_default())
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let path = Config::config_path()?;
    if !fs::exists(&path)? || overwrite {
        Config::default().save(true)?;

        println!("Created default configuration file.");
        println!("Point modules at their inputs with, for example:");
        println!("   hpi config set zsh.export-path '~/backups/zsh/*'");
        println!("or edit");
        println!("   {}", path.display());
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

fn show_history(name: &str, history: Option<&HistoryConfig>) {
    match history {
        Some(h) => {
            println!("   {name}.export_path: {:?}", h.export_path);
            println!(
                "   {name}.live_file: {}",
                h.live_file.as_deref().unwrap_or("Not set")
            );
        }
        None => println!("   {name}: Not configured"),
    }
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            println!("Current configuration:");
            println!("   cache.enabled: {}", config.cache.enabled);
            println!(
                "   cache.dir: {}",
                config
                    .cache
                    .dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "Default".to_string())
            );
            show_history("zsh", config.zsh.as_ref());
            show_history("bash", config.bash.as_ref());
            show_history("ttt", config.ttt.as_ref());
            match &config.window_watcher {
                Some(w) => {
                    println!("   window_watcher.export_path: {:?}", w.export_path);
                    println!("   window_watcher.force_individual: {:?}", w.force_individual);
                }
                None => println!("   window_watcher: Not configured"),
            }
            match &config.commits {
                Some(c) => {
                    println!("   commits.roots: {:?}", c.roots);
                    println!("   commits.emails: {:?}", c.emails);
                    println!("   commits.workers: {}", c.workers);
                }
                None => println!("   commits: Not configured"),
            }
            match &config.browsing {
                Some(b) => {
                    println!("   browsing.export_path: {:?}", b.export_path);
                    println!("   browsing.live_databases: {:?}", b.live_databases);
                }
                None => println!("   browsing: Not configured"),
            }
        }
        None => {
            println!("No configuration file found.");
            println!("   Run 'hpi config init' to create one.");
        }
    }
    Ok(())
}

/// Comma separated list, empty entries dropped.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .context("Invalid boolean value. Use 'true' or 'false'")
}

fn set_history_value(history: &mut Option<HistoryConfig>, field: &str, value: &str) -> Result<()> {
    let history = history.get_or_insert_with(HistoryConfig::default);
    match field {
        "export-path" => history.export_path = parse_list(value),
        "live-file" => history.live_file = Some(value.to_string()).filter(|v| !v.is_empty()),
        _ => anyhow::bail!("Unknown history field: {}", field),
    }
    Ok(())
}

/// Apply one `section.field` assignment to `config`.
pub fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let (section, field) = key
        .split_once('.')
        .with_context(|| format!("Config keys look like 'section.field', got: {key}"))?;

    match (section, field) {
        ("cache", "enabled") => config.cache.enabled = parse_bool(value)?,
        ("cache", "dir") => {
            config.cache.dir = Some(PathBuf::from(value)).filter(|d| !d.as_os_str().is_empty())
        }
        ("zsh", f) => set_history_value(&mut config.zsh, f, value)?,
        ("bash", f) => set_history_value(&mut config.bash, f, value)?,
        ("ttt", f) => set_history_value(&mut config.ttt, f, value)?,
        ("window-watcher", f) => {
            let ww = config
                .window_watcher
                .get_or_insert_with(WindowWatcherConfig::default);
            match f {
                "export-path" => ww.export_path = parse_list(value),
                "live-file" => ww.live_file = Some(value.to_string()).filter(|v| !v.is_empty()),
                "force-individual" => ww.force_individual = parse_list(value),
                _ => anyhow::bail!("Unknown window-watcher field: {}", f),
            }
        }
        ("commits", f) => {
            let commits = config.commits.get_or_insert_with(CommitsConfig::default);
            match f {
                "roots" => commits.roots = parse_list(value),
                "emails" => commits.emails = parse_list(value),
                "workers" => {
                    let workers = value.parse::<usize>().context("Invalid number value")?;
                    anyhow::ensure!(workers > 0, "workers must be at least 1");
                    commits.workers = workers;
                }
                _ => anyhow::bail!("Unknown commits field: {}", f),
            }
        }
        ("browsing", f) => {
            let browsing = config.browsing.get_or_insert_with(BrowsingConfig::default);
            match f {
                "export-path" => browsing.export_path = parse_list(value),
                "live-databases" => browsing.live_databases = parse_list(value),
                _ => anyhow::bail!("Unknown browsing field: {}", f),
            }
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }
    Ok(())
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load_or_default()?;
    apply_config_value(&mut config, key, value)?;
    config.save(false)?;
    Ok(())
}
