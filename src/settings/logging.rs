use serde::{Deserialize, Deserializer};
use tracing::Level;
use super::{server::parse_env_var, SettingsError};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// 로그 출력 대상. `stdout` 이외의 값은 파일 경로로 해석합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LogOutput {
    #[default]
    Stdout,
    File(String),
}

impl std::str::FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("빈 로그 출력 경로".to_string()),
            value if value.eq_ignore_ascii_case("stdout") => Ok(LogOutput::Stdout),
            path => Ok(LogOutput::File(path.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: Level,
    pub output: LogOutput,
}

impl LogSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            format: parse_env_var("PROXY_LOG_FORMAT", || LogFormat::Text)?,
            level: parse_env_var("PROXY_LOG_LEVEL", || Level::INFO)?,
            output: parse_env_var("PROXY_LOG_OUTPUT", || LogOutput::Stdout)?,
        })
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: Level::INFO,
            output: LogOutput::default(),
        }
    }
}

impl<'de> Deserialize<'de> for LogSettings {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            #[serde(default)]
            format: LogFormat,
            #[serde(default)]
            level: Option<String>,
            #[serde(default)]
            output: Option<String>,
        }

        let helper = Helper::deserialize(deserializer)?;
        let level = match helper.level {
            Some(level) => level.parse::<Level>().map_err(serde::de::Error::custom)?,
            None => Level::INFO,
        };
        let output = match helper.output {
            Some(output) => output.parse::<LogOutput>().map_err(serde::de::Error::custom)?,
            None => LogOutput::Stdout,
        };

        Ok(LogSettings {
            format: helper.format,
            level,
            output,
        })
    }
}
