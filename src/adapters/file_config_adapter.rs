//! INI file configuration adapter.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    /// Replace one value, as command-line overrides do.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.config
            .set(section, key, Some(value.trim().to_string()));
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[backtest]
start_date = 2024-01-01
end_date = 2024-03-31
initial_capital = 10000.0
timeframe = 4h
max_hold_periods = 6

[entry]
direction = short_only
min_pct_chg = 0.12

[delay]
enabled = yes

[risk]
tier_bounds = 0.2, 0.4

[data]
source = csv
path = /var/lib/klines
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_sections() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(
            adapter.get_string("data", "path"),
            Some("/var/lib/klines".to_string())
        );
        assert_eq!(
            adapter.get_string("entry", "direction"),
            Some("short_only".to_string())
        );
        assert_eq!(
            adapter.get_string("risk", "tier_bounds"),
            Some("0.2, 0.4".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_value_or_default() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.get_int("backtest", "max_hold_periods", 0), 6);
        assert_eq!(adapter.get_int("delay", "periods", 4), 4);
        assert_eq!(adapter.get_int("entry", "direction", 42), 42);
    }

    #[test]
    fn get_double_returns_value_or_default() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.get_double("entry", "min_pct_chg", 0.0), 0.12);
        assert_eq!(adapter.get_double("entry", "position_size", 0.1), 0.1);
        assert_eq!(adapter.get_double("data", "source", 99.9), 99.9);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter =
            FileConfigAdapter::from_string("[delay]\na = true\nb = YES\nc = 1\nd = off\ne = no\nf = 0\n")
                .unwrap();
        assert!(adapter.get_bool("delay", "a", false));
        assert!(adapter.get_bool("delay", "b", false));
        assert!(adapter.get_bool("delay", "c", false));
        assert!(!adapter.get_bool("delay", "d", true));
        assert!(!adapter.get_bool("delay", "e", true));
        assert!(!adapter.get_bool("delay", "f", true));
        assert!(adapter.get_bool("delay", "missing", true));
    }

    #[test]
    fn set_overrides_and_adds_values() {
        let mut adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        adapter.set("backtest", "start_date", " 2024-02-01 ");
        adapter.set("backtest", "instruments", "BTCUSDT");
        assert_eq!(
            adapter.get_string("backtest", "start_date"),
            Some("2024-02-01".to_string())
        );
        assert_eq!(
            adapter.get_string("backtest", "instruments"),
            Some("BTCUSDT".to_string())
        );
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config(SAMPLE);
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("backtest", "timeframe"),
            Some("4h".to_string())
        );
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        assert!(FileConfigAdapter::from_file("/nonexistent/path/klinetrader.ini").is_err());
    }
}
