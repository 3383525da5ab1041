use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::PoolOptions;
use crate::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub max_frame_size: usize,
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 9009,
            max_connection: 1024,
            max_frame_size: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub initial: usize,
    pub max_idle: usize,
    pub max_capacity: usize,
    pub max_idle_time_secs: u64,
}

impl PoolConfig {
    pub fn options(&self) -> PoolOptions {
        PoolOptions {
            initial: self.initial,
            max_idle: self.max_idle,
            max_capacity: self.max_capacity,
            max_idle_time: Duration::from_secs(self.max_idle_time_secs),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial: 1,
            max_idle: 10,
            max_capacity: 20,
            max_idle_time_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    pub connect_timeout_millis: u64,
    pub acquire_timeout_millis: u64,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout_millis: 3000,
            acquire_timeout_millis: 5000,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl AppConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| {
                AppError::InvalidConfig(format!(
                    "config file path: {}",
                    path.as_ref().to_string_lossy()
                ))
            })?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_toml() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[network]
ip = "127.0.0.1"
port = 9100
max_connection = 64
max_frame_size = 1048576

[pool]
initial = 2
max_idle = 4
max_capacity = 8
max_idle_time_secs = 30

[client]
connect_timeout_millis = 1000
acquire_timeout_millis = 2000
"#
        )
        .unwrap();

        let config = AppConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.network.listen_addr(), "127.0.0.1:9100");
        assert_eq!(config.network.max_connection, 64);
        let options = config.pool.options();
        assert_eq!(options.initial, 2);
        assert_eq!(options.max_idle_time, Duration::from_secs(30));
        assert_eq!(config.client.connect_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[network]
ip = "0.0.0.0"
port = 9009
max_connection = 1024
max_frame_size = 8388608
"#
        )
        .unwrap();

        let config = AppConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.pool.max_capacity, 20);
        assert_eq!(config.client.acquire_timeout(), Duration::from_millis(5000));
    }
}
