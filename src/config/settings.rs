use serde::Deserialize;

use crate::utils::RouterError;

/// Port the fallback broker URL points at.
pub const AMQP_PORT: u16 = 5672;

/// Top-level configuration settings for the router.
///
/// Groups the broker endpoint inputs, the management API inputs and the
/// process-level settings (environment name and log level).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub management: ManagementSettings,
    pub app: AppSettings,
}

/// Inputs used to resolve the broker endpoint URL.
///
/// `cloudamqp_url` wins over `rabbitmq_url`; when neither is present the URL
/// is built from `admin_password` and `mqtt_host`.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub cloudamqp_url: Option<String>,
    pub rabbitmq_url: Option<String>,
    pub admin_password: Option<String>,
    pub mqtt_host: Option<String>,
    pub mqtt_port: u16,
}

/// Inputs for the broker management HTTP API.
///
/// `force_ssl` is on whenever `FORCE_SSL` is present, whatever its value.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ManagementSettings {
    pub url: Option<String>,
    pub force_ssl: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub environment: String,
    pub log_level: String,
}

/// Flat view of the environment (and `config/default.toml`).
///
/// Keys match the lowercased environment variable names, so `RABBITMQ_URL`
/// lands in `rabbitmq_url`. Every value is optional and filled from
/// `Settings::default()` when missing.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub cloudamqp_url: Option<String>,
    pub rabbitmq_url: Option<String>,
    pub admin_password: Option<String>,
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub force_ssl: Option<String>,
    pub rabbit_mgmt_url: Option<String>,
    pub app_env: Option<String>,
    pub log_level: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            cloudamqp_url: None,
            rabbitmq_url: None,
            admin_password: None,
            mqtt_host: None,
            mqtt_port: 1883,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Resolves the broker endpoint URL.
    ///
    /// Order: `CLOUDAMQP_URL`, then `RABBITMQ_URL`, then
    /// `amqp://admin:<ADMIN_PASSWORD>@<MQTT_HOST>:5672`. The last form needs
    /// both values and fails with `RouterError::Configuration` otherwise.
    pub fn broker_url(&self) -> Result<String, RouterError> {
        if let Some(url) = present(&self.broker.cloudamqp_url) {
            return Ok(url.to_string());
        }
        if let Some(url) = present(&self.broker.rabbitmq_url) {
            return Ok(url.to_string());
        }

        let password = present(&self.broker.admin_password).ok_or_else(|| {
            RouterError::Configuration(
                "ADMIN_PASSWORD is required when no broker URL is configured".to_string(),
            )
        })?;
        let host = present(&self.broker.mqtt_host).ok_or_else(|| {
            RouterError::Configuration(
                "MQTT_HOST is required when no broker URL is configured".to_string(),
            )
        })?;

        Ok(format!("amqp://admin:{password}@{host}:{AMQP_PORT}"))
    }

    pub fn is_production(&self) -> bool {
        self.app.environment.eq_ignore_ascii_case("production")
    }
}

impl PartialSettings {
    /// Fills every missing value from `Settings::default()`.
    pub fn merge(self) -> Settings {
        let default = Settings::default();

        Settings {
            broker: BrokerSettings {
                cloudamqp_url: self.cloudamqp_url,
                rabbitmq_url: self.rabbitmq_url,
                admin_password: self.admin_password,
                mqtt_host: self.mqtt_host,
                mqtt_port: self.mqtt_port.unwrap_or(default.broker.mqtt_port),
            },
            management: ManagementSettings {
                url: self.rabbit_mgmt_url.filter(|u| !u.trim().is_empty()),
                force_ssl: self.force_ssl.is_some(),
            },
            app: AppSettings {
                environment: self.app_env.unwrap_or(default.app.environment),
                log_level: self.log_level.unwrap_or(default.app.log_level),
            },
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
