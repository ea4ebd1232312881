use crate::deploy::DeployError;
use crate::docker::DockerError;
use crate::settings::SettingsError;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    ConfigError(String),
    IoError(std::io::Error),
    SettingsError(SettingsError),
    DockerError(DockerError),
    DeployError(DeployError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        Error::SettingsError(err)
    }
}

impl From<DockerError> for Error {
    fn from(err: DockerError) -> Self {
        Error::DockerError(err)
    }
}

impl From<DeployError> for Error {
    fn from(err: DeployError) -> Self {
        Error::DeployError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigError(msg) => write!(f, "Config Error: {}", msg),
            Error::IoError(e) => write!(f, "IO Error: {}", e),
            Error::SettingsError(e) => write!(f, "Settings Error: {}", e),
            Error::DockerError(e) => write!(f, "Docker Error: {}", e),
            Error::DeployError(e) => write!(f, "Deploy Error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigError(_) => None,
            Error::IoError(e) => Some(e),
            Error::SettingsError(e) => Some(e),
            Error::DockerError(e) => Some(e),
            Error::DeployError(e) => Some(e),
        }
    }
}
