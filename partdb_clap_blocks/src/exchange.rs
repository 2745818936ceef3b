//! Partition-exchange-related configs.

use partdb_exchange::{DEFAULT_TEMP_NAME_PREFIX, ExchangeOptions};

/// CLI config for partition exchange.
#[derive(Debug, Clone, clap::Parser)]
pub struct ExchangeConfig {
    /// Whether CHECK constraints added to an exchanged-in table are checked against its rows
    /// (WITH VALIDATION) or trusted as they are (WITHOUT VALIDATION).
    #[clap(
        long = "exchange-validation",
        env = "PARTDB_EXCHANGE_VALIDATION",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub validate: bool,

    /// Prefix of the temporary constraint name used while exchanging constraint names between
    /// the old and the new part.
    #[clap(
        long = "exchange-temp-name-prefix",
        env = "PARTDB_EXCHANGE_TEMP_NAME_PREFIX",
        default_value = DEFAULT_TEMP_NAME_PREFIX,
        action
    )]
    pub temp_name_prefix: String,
}

impl From<&ExchangeConfig> for ExchangeOptions {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            validate: config.validate,
            temp_name_prefix: config.temp_name_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults() {
        let config = ExchangeConfig::try_parse_from(["my_binary"]).unwrap();
        assert_eq!(ExchangeOptions::from(&config), ExchangeOptions::default());
    }

    #[test]
    fn without_validation() {
        let config = ExchangeConfig::try_parse_from([
            "my_binary",
            "--exchange-validation",
            "false",
            "--exchange-temp-name-prefix",
            "xchg_",
        ])
        .unwrap();
        let options = ExchangeOptions::from(&config);
        assert!(!options.validate);
        assert_eq!(options.temp_name_prefix, "xchg_");
    }

    #[test]
    fn validation_takes_a_bool() {
        let error = ExchangeConfig::try_parse_from(["my_binary", "--exchange-validation", "maybe"])
            .unwrap_err()
            .to_string();
        assert!(
            error.contains("invalid value 'maybe' for '--exchange-validation <VALIDATE>'"),
            "{error}"
        );
    }
}
