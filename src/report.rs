use crate::client::layout::Observation;
use crate::config::{OutputFormat, ReportConfig};
use crate::error::{Error, Result};
use serde::Serialize;
use std::io::Write;

/// waybar custom 模块的一行 JSON
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct WaybarResponse {
    pub text: String,
    pub tooltip: String,
    pub class: String,
}

pub struct Reporter {
    format: OutputFormat,
    only_changes: bool,
    last: Option<String>,
}

impl Reporter {
    pub fn new(config: &ReportConfig) -> Self {
        Reporter {
            format: config.format,
            only_changes: config.only_changes,
            last: None,
        }
    }

    /// 没有 keymap 或被策略抑制时不输出
    pub fn render(&self, observation: &Observation, layouts: &[String]) -> Result<Option<String>> {
        let (text, class) = match observation {
            Observation::NoKeymap | Observation::Suppressed => return Ok(None),
            Observation::Unknown => ("unknown", "unknown"),
            Observation::Active(name) => (name.as_str(), "active"),
        };

        match self.format {
            OutputFormat::Plain => Ok(Some(text.to_string())),
            OutputFormat::Json => {
                let response = WaybarResponse {
                    text: text.to_string(),
                    tooltip: layouts.join("\n"),
                    class: class.to_string(),
                };
                Ok(Some(serde_json::to_string(&response)?))
            }
        }
    }

    /// 写出一行，返回是否真的写了
    pub fn emit<W: Write>(
        &mut self,
        out: &mut W,
        observation: &Observation,
        layouts: &[String],
    ) -> Result<bool> {
        let Some(line) = self.render(observation, layouts)? else {
            return Ok(false);
        };
        if self.only_changes && self.last.as_deref() == Some(line.as_str()) {
            return Ok(false);
        }

        writeln!(out, "{}", line).map_err(Error::Output)?;
        out.flush().map_err(Error::Output)?;
        self.last = Some(line);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(format: OutputFormat, only_changes: bool) -> Reporter {
        Reporter::new(&ReportConfig {
            format,
            only_changes,
            ..ReportConfig::default()
        })
    }

    fn layouts() -> Vec<String> {
        vec!["English (US)".to_string(), "German".to_string()]
    }

    #[test]
    fn plain_lines() {
        let mut r = reporter(OutputFormat::Plain, false);
        let mut out = Vec::new();
        let active = Observation::Active("German".to_string());

        assert!(r.emit(&mut out, &active, &layouts()).unwrap());
        assert!(r.emit(&mut out, &Observation::Unknown, &layouts()).unwrap());
        assert!(!r.emit(&mut out, &Observation::NoKeymap, &layouts()).unwrap());
        assert!(!r.emit(&mut out, &Observation::Suppressed, &layouts()).unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), "German\nunknown\n");
    }

    #[test]
    fn polling_repeats_unless_only_changes() {
        let active = Observation::Active("German".to_string());

        let mut every = reporter(OutputFormat::Plain, false);
        let mut out = Vec::new();
        every.emit(&mut out, &active, &[]).unwrap();
        every.emit(&mut out, &active, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "German\nGerman\n");

        let mut changes = reporter(OutputFormat::Plain, true);
        let mut out = Vec::new();
        changes.emit(&mut out, &active, &[]).unwrap();
        assert!(!changes.emit(&mut out, &active, &[]).unwrap());
        changes
            .emit(&mut out, &Observation::Active("French".to_string()), &[])
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "German\nFrench\n");
    }

    #[test]
    fn json_line_matches_waybar_shape() {
        let r = reporter(OutputFormat::Json, false);
        let line = r
            .render(&Observation::Active("German".to_string()), &layouts())
            .unwrap()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["text"], "German");
        assert_eq!(parsed["tooltip"], "English (US)\nGerman");
        assert_eq!(parsed["class"], "active");

        let unknown = r.render(&Observation::Unknown, &[]).unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&unknown).unwrap();
        assert_eq!(parsed["class"], "unknown");
    }

    #[test]
    fn nothing_to_render_without_layout() {
        let r = reporter(OutputFormat::Json, false);
        assert!(r.render(&Observation::NoKeymap, &layouts()).unwrap().is_none());
        assert!(r.render(&Observation::Suppressed, &layouts()).unwrap().is_none());
    }

    #[test]
    fn layout_names_are_escaped_in_json() {
        let r = reporter(OutputFormat::Json, false);
        let name = "Custom \"quoted\"\tlayout".to_string();
        let line = r
            .render(&Observation::Active(name.clone()), &[name.clone()])
            .unwrap()
            .unwrap();
        assert!(!line.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["text"], name.as_str());
    }
}
