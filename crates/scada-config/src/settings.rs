//! Settings XML (spec §6, schema in §6.2), parsed with `quick-xml`'s
//! serde-compatible `serialize` feature — the only crate in the whole
//! retrieval pack that reads XML (see DESIGN.md).

use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "ScadaServerSettings")]
pub struct Settings {
    #[serde(rename = "Network")]
    pub network: Network,
    #[serde(rename = "Paths")]
    pub paths: Paths,
    #[serde(rename = "Modules", default)]
    pub modules: Modules,
    #[serde(rename = "Periods")]
    pub periods: Periods,
    #[serde(rename = "Retention")]
    pub retention: Retention,
    #[serde(rename = "Flags")]
    pub flags: Flags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    #[serde(rename = "@tcp_port")]
    pub tcp_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    #[serde(rename = "@archive_dir")]
    pub archive_dir: String,
    #[serde(rename = "@archive_copy_dir", default)]
    pub archive_copy_dir: Option<String>,
    #[serde(rename = "@base_dat_dir")]
    pub base_dat_dir: String,
    #[serde(rename = "@interface_dir", default)]
    pub interface_dir: Option<String>,
    #[serde(rename = "@module_dir", default)]
    pub module_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Modules {
    #[serde(rename = "Module", default)]
    pub module: Vec<ModuleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleEntry {
    #[serde(rename = "@file")]
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Periods {
    #[serde(rename = "@write_cur_period")]
    pub write_cur_period: u64,
    #[serde(rename = "@write_min_period")]
    pub write_min_period: u64,
    #[serde(rename = "@write_hr_period")]
    pub write_hr_period: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retention {
    #[serde(rename = "@store_min_period")]
    pub store_min_period: u64,
    #[serde(rename = "@store_hr_period")]
    pub store_hr_period: u64,
    #[serde(rename = "@store_ev_period")]
    pub store_ev_period: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Flags {
    #[serde(rename = "@write_to_copy", default)]
    pub write_to_copy: bool,
    #[serde(rename = "@inactive_unreliable_minutes", default)]
    pub inactive_unreliable_minutes: u64,
    #[serde(rename = "@detailed_log", default)]
    pub detailed_log: bool,
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    quick_xml::de::from_str(&text).map_err(|source| ConfigError::Xml { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
<ScadaServerSettings>
  <Network tcp_port="2000"/>
  <Paths archive_dir="./archive" base_dat_dir="./base"/>
  <Modules><Module file="audit.so"/><Module file="hist.so"/></Modules>
  <Periods write_cur_period="1" write_min_period="60" write_hr_period="3600"/>
  <Retention store_min_period="365" store_hr_period="1095" store_ev_period="1095"/>
  <Flags write_to_copy="true" inactive_unreliable_minutes="60" detailed_log="false"/>
</ScadaServerSettings>
"#;

    #[test]
    fn parses_sample_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.xml");
        std::fs::write(&path, SAMPLE).unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.network.tcp_port, 2000);
        assert_eq!(settings.paths.archive_dir, "./archive");
        assert_eq!(settings.modules.module.len(), 2);
        assert_eq!(settings.modules.module[0].file, "audit.so");
        assert_eq!(settings.periods.write_min_period, 60);
        assert!(settings.flags.write_to_copy);
        assert!(!settings.flags.detailed_log);
    }

    #[test]
    fn missing_modules_element_defaults_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.xml");
        let without_modules = SAMPLE.replace(
            r#"<Modules><Module file="audit.so"/><Module file="hist.so"/></Modules>"#,
            "",
        );
        std::fs::write(&path, without_modules).unwrap();
        let settings = load_settings(&path).unwrap();
        assert!(settings.modules.module.is_empty());
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.xml");
        assert!(load_settings(&path).is_err());
    }
}
