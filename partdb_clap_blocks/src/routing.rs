//! Row-routing-related configs.

use partdb_router::{RoutingMode, RoutingOptions};

/// Which partitions a routed row resolves to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RoutingModeArg {
    /// Exactly one partition, or none.
    #[default]
    Single,

    /// Every partition that may hold the row; null key columns match all branches.
    All,
}

impl From<RoutingModeArg> for RoutingMode {
    fn from(arg: RoutingModeArg) -> Self {
        match arg {
            RoutingModeArg::Single => Self::Single,
            RoutingModeArg::All => Self::All,
        }
    }
}

/// CLI config for row routing.
#[derive(Debug, Clone, Copy, Default, clap::Parser)]
pub struct RoutingConfig {
    /// Route through the template levels of a table instead of its concrete partitions.
    #[clap(
        long = "partition-include-templates",
        env = "PARTDB_PARTITION_INCLUDE_TEMPLATES",
        default_value = "false",
        action
    )]
    pub include_templates: bool,

    /// Routing mode.
    #[clap(
        value_enum,
        long = "partition-routing-mode",
        env = "PARTDB_PARTITION_ROUTING_MODE",
        default_value = "single",
        action
    )]
    pub mode: RoutingModeArg,
}

impl From<&RoutingConfig> for RoutingOptions {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            mode: config.mode.into(),
            include_templates: config.include_templates,
        }
    }
}
