use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::error::ConfigError;
use super::tags::TagValue;

/// Shared, optional configuration handed to converters and builders.
/// None means "use compiled-in defaults".
pub type ConfigSpc = Option<Arc<Configuration>>;

type Section = BTreeMap<String, String>;

/// Sectioned key/value configuration.
///
/// Values are text and are parsed on access, like event tags. Reads go to the current
/// section, selected with [`Configuration::set_section`]. The un-named section `""` always
/// exists and holds global keys such as `Name`.
///
/// Two on-disk forms are understood: INI style text
///
/// ```text
/// Name = beam_test
/// [DataCollector.dc1]
/// EventBuilder = TriggerN
/// FilePattern = "run$6R$X" ; quoted values keep comment characters
/// ```
///
/// and YAML, where top level scalars land in the un-named section and top level mappings
/// become sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    sections: BTreeMap<String, Section>,
    current: String,
}

impl Default for Configuration {
    fn default() -> Self {
        let mut sections = BTreeMap::new();
        sections.insert(String::new(), Section::new());
        Self {
            sections,
            current: String::new(),
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse INI style text. If `section` is non-empty only the un-named section and that
    /// section are kept, and `section` becomes current.
    pub fn from_ini_str(text: &str, section: &str) -> Self {
        let mut parsed: BTreeMap<String, Section> = BTreeMap::new();
        parsed.insert(String::new(), Section::new());
        let mut cur = String::new();
        for line in text.lines() {
            match line.find('=') {
                None => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                        continue;
                    }
                    if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
                        cur = line[1..line.len() - 1].to_string();
                        parsed.entry(cur.clone()).or_default();
                    }
                }
                Some(equals) => {
                    let key = line[..equals].trim().to_string();
                    let value = parse_ini_value(&line[equals + 1..]);
                    parsed.entry(cur.clone()).or_default().insert(key, value);
                }
            }
        }

        let mut config = Self::default();
        if section.is_empty() {
            config.sections = parsed;
        } else {
            if let Some(global) = parsed.remove("") {
                config.sections.insert(String::new(), global);
            }
            if let Some(sec) = parsed.remove(section) {
                config.sections.insert(section.to_string(), sec);
                config.current = section.to_string();
            }
        }
        config
    }

    /// Parse YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mut config = Self::default();
        let mapping = match value {
            serde_yaml::Value::Mapping(m) => m,
            serde_yaml::Value::Null => return Ok(config),
            _ => return Err(ConfigError::BadSection(String::new())),
        };
        for (key, value) in mapping {
            let key = yaml_scalar(&key).ok_or_else(|| ConfigError::BadSection(String::new()))?;
            match value {
                serde_yaml::Value::Mapping(inner) => {
                    let section = config.sections.entry(key.clone()).or_default();
                    for (k, v) in inner {
                        let k = yaml_scalar(&k)
                            .ok_or_else(|| ConfigError::BadSection(key.clone()))?;
                        let v = yaml_scalar(&v)
                            .ok_or_else(|| ConfigError::BadValue(k.clone(), key.clone()))?;
                        section.insert(k, v);
                    }
                }
                other => {
                    let v = yaml_scalar(&other)
                        .ok_or_else(|| ConfigError::BadValue(key.clone(), String::new()))?;
                    config.global_mut().insert(key, v);
                }
            }
        }
        Ok(config)
    }

    /// Read a configuration file. `.yaml`/`.yml` files are parsed as YAML, anything else as
    /// INI text. The file path is stored as `Name` in the un-named section.
    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::BadFilePath(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let mut config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text)?,
            _ => Self::from_ini_str(&text, ""),
        };
        config
            .global_mut()
            .insert(String::from("Name"), path.to_string_lossy().to_string());
        Ok(config)
    }

    /// A copy restricted to the un-named section plus `section`, with `section` current.
    pub fn with_section(&self, section: &str) -> Self {
        let mut config = Self::default();
        if let Some(global) = self.sections.get("") {
            config.sections.insert(String::new(), global.clone());
        }
        if let Some(sec) = self.sections.get(section) {
            config.sections.insert(section.to_string(), sec.clone());
            config.current = section.to_string();
        }
        config
    }

    fn global_mut(&mut self) -> &mut Section {
        self.sections.entry(String::new()).or_default()
    }

    /// The configuration's name, taken from the un-named section.
    pub fn name(&self) -> &str {
        self.sections
            .get("")
            .and_then(|s| s.get("Name"))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Make `section` current, creating it if needed.
    pub fn set_section(&mut self, section: &str) {
        self.sections.entry(section.to_string()).or_default();
        self.current = section.to_string();
    }

    /// Make `section` current only if it exists. Returns whether it did.
    pub fn select_section(&mut self, section: &str) -> bool {
        if self.sections.contains_key(section) {
            self.current = section.to_string();
            true
        } else {
            false
        }
    }

    pub fn current_section(&self) -> &str {
        &self.current
    }

    fn current(&self) -> Option<&Section> {
        self.sections.get(&self.current)
    }

    /// Typed read from the current section. Missing or unparsable values give `default`.
    pub fn get<T: TagValue>(&self, key: &str, default: T) -> T {
        self.get_str(key)
            .and_then(|text| T::parse_tag(text))
            .unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.current()
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn set<T: fmt::Display>(&mut self, key: &str, value: T) {
        let current = self.current.clone();
        self.sections
            .entry(current)
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn has(&self, key: &str) -> bool {
        self.current().map(|s| s.contains_key(key)).unwrap_or(false)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Keys of the current section.
    pub fn keys(&self) -> Vec<&str> {
        self.current()
            .map(|s| s.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn sections(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    /// Serialize back to INI text.
    pub fn save(&self) -> String {
        let mut out = String::new();
        for (name, section) in self.sections.iter() {
            if !name.is_empty() {
                out.push_str(&format!("[{name}]\n"));
            }
            for (k, v) in section.iter() {
                if v.contains(';') || v.contains('#') {
                    out.push_str(&format!("{k} = \"{v}\"\n"));
                } else {
                    out.push_str(&format!("{k} = {v}\n"));
                }
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<Configuration>")?;
        for (name, section) in self.sections.iter() {
            writeln!(f, "  <Section title=\"{name}\">")?;
            for (k, v) in section.iter() {
                writeln!(f, "    <{k}>{v}</{k}>")?;
            }
            writeln!(f, "  </Section>")?;
        }
        writeln!(f, "</Configuration>")
    }
}

fn parse_ini_value(raw: &str) -> String {
    let value = raw.trim();
    let quoted = value.len() >= 2
        && ((value.starts_with('\'') && value.ends_with('\''))
            || (value.starts_with('"') && value.ends_with('"')));
    if quoted {
        return value[1..value.len() - 1].to_string();
    }
    match value.find([';', '#']) {
        Some(i) => value[..i].trim().to_string(),
        None => value.to_string(),
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INI: &str = "Name = test_beam\n\
        ; comment line\n\
        [DataCollector.dc1]\n\
        EventBuilder = TriggerN   # trailing comment\n\
        FilePattern = \"run$6R;$X\"\n\
        Threshold = 0x10\n\
        \n\
        [Producer.tlu]\n\
        Rate = 100\n";

    #[test]
    fn test_ini_sections_and_comments() {
        let mut conf = Configuration::from_ini_str(INI, "");
        assert_eq!(conf.name(), "test_beam");
        assert!(conf.has_section("Producer.tlu"));
        assert!(!conf.has("EventBuilder"));
        assert!(conf.select_section("DataCollector.dc1"));
        assert_eq!(conf.get("EventBuilder", String::new()), "TriggerN");
        assert_eq!(conf.get_str("FilePattern"), Some("run$6R;$X"));
        assert_eq!(conf.get("Threshold", 0u32), 16);
        assert_eq!(conf.get("Missing", 5i64), 5);
        assert!(!conf.select_section("Nope"));
        assert_eq!(conf.current_section(), "DataCollector.dc1");
    }

    #[test]
    fn test_ini_restricted_section() {
        let conf = Configuration::from_ini_str(INI, "Producer.tlu");
        assert_eq!(conf.sections(), vec!["", "Producer.tlu"]);
        assert_eq!(conf.get("Rate", 0u32), 100);
        assert_eq!(conf.name(), "test_beam");
    }

    #[test]
    fn test_yaml() {
        let yaml = "Name: yaml_beam\nDataCollector.dc1:\n  EventBuilder: Bcid\n  Window: 128\n  Enabled: true\n";
        let mut conf = Configuration::from_yaml_str(yaml).unwrap();
        assert_eq!(conf.name(), "yaml_beam");
        conf.set_section("DataCollector.dc1");
        assert_eq!(conf.get("Window", 0usize), 128);
        assert!(conf.get("Enabled", false));
        assert_eq!(conf.keys(), vec!["Enabled", "EventBuilder", "Window"]);
    }

    #[test]
    fn test_save_round_trip() {
        let conf = Configuration::from_ini_str(INI, "");
        let again = Configuration::from_ini_str(&conf.save(), "");
        assert_eq!(conf, again);
    }

    #[test]
    fn test_with_section_copy() {
        let conf = Configuration::from_ini_str(INI, "");
        let view = conf.with_section("DataCollector.dc1");
        assert_eq!(view.current_section(), "DataCollector.dc1");
        assert_eq!(view.get_str("EventBuilder"), Some("TriggerN"));
        assert!(!view.has_section("Producer.tlu"));
    }

    #[test]
    fn test_missing_file() {
        let err = Configuration::read_file(Path::new("/definitely/not/here.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::BadFilePath(_)));
    }
}
