pub mod endpoint;
mod settings;

use config::{Config, Environment, File};

use crate::utils::RouterError;

pub use endpoint::{DEFAULT_USERNAME, Endpoint};
pub use settings::{
    AMQP_PORT, AppSettings, BrokerSettings, ManagementSettings, PartialSettings, Settings,
};

/// Loads the configuration from the optional `config/default` file and the
/// process environment, then merges it with default values.
///
/// Environment keys are taken verbatim (lowercased, no nesting separator), so
/// the usual deployment variables such as `RABBITMQ_URL` or `FORCE_SSL` apply
/// directly.
pub fn load_config() -> Result<Settings, RouterError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default());

    let config = builder.build()?;

    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge())
}
