use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// 何时输出布局名
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// 每轮主循环输出一次
    #[default]
    Polling,
    /// 收到第一个 keymap 后退出主循环，结束时输出一次
    Oneshot,
}

/// 只有一个布局时是否仍然输出
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportPolicy {
    #[default]
    Always,
    /// 至少两个布局时才输出
    Ambiguous,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Plain,
    /// waybar custom 模块格式
    Json,
}

// 1. 对应 [report] 部分
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub mode: ReportMode,
    pub policy: ReportPolicy,
    pub format: OutputFormat,
    pub only_changes: bool,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Background,
    Bottom,
    Top,
    Overlay,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnchorEdge {
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Interactivity {
    None,
    Exclusive,
    OnDemand,
}

// 2. 对应 [overlay] 部分
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub layer: LayerKind,
    pub namespace: String,
    pub anchor: Vec<AnchorEdge>,
    pub exclusive_zone: i32,
    pub keyboard_interactivity: Interactivity,
    pub width: u32,
    pub height: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            enabled: false,
            layer: LayerKind::Overlay,
            namespace: "kblayout".to_string(),
            anchor: vec![AnchorEdge::Top, AnchorEdge::Right],
            exclusive_zone: -1,
            keyboard_interactivity: Interactivity::OnDemand,
            width: 1,
            height: 1,
        }
    }
}

// 3. 根配置结构体
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub report: ReportConfig,
    pub overlay: OverlayConfig,
}

impl Config {
    /// 配置文件路径：$KBLAYOUT_CONFIG > $XDG_CONFIG_HOME/kblayout/config.toml > ~/.config/kblayout/config.toml
    pub fn get_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("KBLAYOUT_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
        };
        Some(base.join("kblayout").join("config.toml"))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Config>(content)
    }

    /// 加载配置文件，失败时回退到默认设置
    pub fn load() -> Self {
        let Some(path) = Self::get_path() else {
            warn!("-> 找不到 HOME 环境变量，将使用默认设置");
            return Config::default();
        };

        if let Ok(content) = fs::read_to_string(&path) {
            match Self::parse(&content) {
                Ok(config) => {
                    info!("-> 已加载配置文件: {:?}", path);
                    return config;
                }
                Err(e) => {
                    warn!("-> 配置文件解析失败: {}，将使用默认设置", e);
                }
            }
        } else {
            info!("-> 未找到配置文件 {:?}，将使用默认设置", path);
        }

        Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.report.mode, ReportMode::Polling);
        assert_eq!(config.report.policy, ReportPolicy::Always);
        assert!(!config.overlay.enabled);
    }

    #[test]
    fn parses_full_file() {
        let config = Config::parse(
            r#"
            [report]
            mode = "oneshot"
            policy = "ambiguous"
            format = "json"
            only_changes = true

            [overlay]
            enabled = true
            layer = "top"
            namespace = "kbd"
            anchor = ["bottom", "left"]
            exclusive_zone = 0
            keyboard_interactivity = "none"
            width = 10
            height = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.report.mode, ReportMode::Oneshot);
        assert_eq!(config.report.policy, ReportPolicy::Ambiguous);
        assert_eq!(config.report.format, OutputFormat::Json);
        assert!(config.report.only_changes);
        assert!(config.overlay.enabled);
        assert_eq!(config.overlay.layer, LayerKind::Top);
        assert_eq!(config.overlay.namespace, "kbd");
        assert_eq!(config.overlay.anchor, vec![AnchorEdge::Bottom, AnchorEdge::Left]);
        assert_eq!(config.overlay.exclusive_zone, 0);
        assert_eq!(config.overlay.keyboard_interactivity, Interactivity::None);
        assert_eq!((config.overlay.width, config.overlay.height), (10, 20));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = Config::parse("[overlay]\nenabled = true\n").unwrap();
        assert!(config.overlay.enabled);
        assert_eq!(config.overlay.layer, LayerKind::Overlay);
        assert_eq!(config.overlay.namespace, "kblayout");
        assert_eq!(config.report, ReportConfig::default());
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Config::parse("[report]\nmode = \"sometimes\"\n").is_err());
    }
}
