use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::capture::DEFAULT_TRIGGER_LEVEL;
use crate::scope::DEFAULT_FRAMES_PER_SECOND;

const SETTINGS_FILE: &str = "scope_synth.cfg";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThemeKind {
    Dark,
    Light,
}

impl ThemeKind {
    pub fn label(self) -> &'static str {
        match self {
            ThemeKind::Dark => "Dark",
            ThemeKind::Light => "Light",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "light" => ThemeKind::Light,
            _ => ThemeKind::Dark,
        }
    }

    pub fn as_key(self) -> &'static str {
        match self {
            ThemeKind::Dark => "dark",
            ThemeKind::Light => "light",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    pub theme: ThemeKind,
    pub output_device: Option<String>,
    pub trigger_level: f32,
    pub frames_per_second: u32,
    pub master_gain: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: ThemeKind::Dark,
            output_device: None,
            trigger_level: DEFAULT_TRIGGER_LEVEL,
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            master_gain: 0.7,
        }
    }
}

impl AppSettings {
    /// Reads `path`, falling back to defaults for a missing file and for any
    /// key that is unknown or does not parse.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw),
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("could not read settings {}: {err}", path.display());
                }
                Self::default()
            }
        }
    }

    pub fn parse(raw: &str) -> Self {
        let mut settings = AppSettings::default();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                settings.apply(key.trim(), value.trim());
            }
        }
        settings
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "theme" => self.theme = ThemeKind::parse(value),
            "output_device" => {
                self.output_device = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "trigger_level" => parse_into(value, &mut self.trigger_level),
            "frames_per_second" => {
                if let Ok(fps) = value.parse::<u32>() {
                    if (1..1000).contains(&fps) {
                        self.frames_per_second = fps;
                    }
                }
            }
            "master_gain" => parse_into(value, &mut self.master_gain),
            other => log::debug!("ignoring unknown setting '{other}'"),
        }
    }

    pub fn render(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&format!("theme={}\n", self.theme.as_key()));
        if let Some(name) = &self.output_device {
            buf.push_str(&format!("output_device={name}\n"));
        }
        buf.push_str(&format!("trigger_level={}\n", self.trigger_level));
        buf.push_str(&format!("frames_per_second={}\n", self.frames_per_second));
        buf.push_str(&format!("master_gain={}\n", self.master_gain));
        buf
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())
    }
}

pub fn default_settings_path() -> PathBuf {
    config_dir().join(SETTINGS_FILE)
}

fn parse_into(value: &str, target: &mut f32) {
    match value.parse::<f32>() {
        Ok(v) if v.is_finite() => *target = v,
        _ => log::debug!("ignoring unparsable value '{value}'"),
    }
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(roaming) = std::env::var("APPDATA") {
            return PathBuf::from(roaming).join("ScopeSynth");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("ScopeSynth");
        }
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("scope-synth");
    }

    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("scope-synth")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from).or_else(|| {
        #[cfg(target_os = "windows")]
        {
            std::env::var("USERPROFILE").ok().map(PathBuf::from)
        }
        #[cfg(not(target_os = "windows"))]
        {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_skips_noise() {
        let raw = "\
# scope settings
theme = light
output_device=USB Audio
trigger_level=0.2
frames_per_second=60
master_gain=oops
volume=11
";
        let settings = AppSettings::parse(raw);
        assert_eq!(settings.theme, ThemeKind::Light);
        assert_eq!(settings.output_device.as_deref(), Some("USB Audio"));
        assert_eq!(settings.trigger_level, 0.2);
        assert_eq!(settings.frames_per_second, 60);
        assert_eq!(settings.master_gain, AppSettings::default().master_gain);
    }

    #[test]
    fn out_of_range_frame_rate_keeps_default() {
        let settings = AppSettings::parse("frames_per_second=5000\n");
        assert_eq!(settings.frames_per_second, DEFAULT_FRAMES_PER_SECOND);
    }

    #[test]
    fn rendered_settings_parse_back() {
        let settings = AppSettings {
            theme: ThemeKind::Light,
            output_device: Some("Speakers".into()),
            trigger_level: -0.25,
            frames_per_second: 45,
            master_gain: 0.4,
        };
        assert_eq!(AppSettings::parse(&settings.render()), settings);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("scope-synth-missing/none.cfg");
        assert_eq!(AppSettings::load(&path), AppSettings::default());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("scope-synth-{}", std::process::id()));
        let path = dir.join("nested").join(SETTINGS_FILE);
        let settings = AppSettings {
            trigger_level: 0.1,
            ..AppSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(AppSettings::load(&path), settings);
        let _ = fs::remove_dir_all(dir);
    }
}
