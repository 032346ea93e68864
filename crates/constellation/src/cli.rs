//! Command-line interface for constellation

use argh::FromArgs;

/// Start a set of interdependent processes in dependency order
#[derive(FromArgs, Debug)]
pub struct SuperviseArgs {
    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(\"config.yaml\")")]
    pub config: String,

    /// validate the config and dependency graph, then exit
    #[argh(switch)]
    pub validate: bool,

    /// show the launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// let a service that finished successfully satisfy its dependents
    #[argh(switch)]
    pub finished_satisfies: bool,

    /// seconds to wait after SIGTERM before killing a process on shutdown
    #[argh(option, default = "5")]
    pub shutdown_timeout: u64,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

impl SuperviseArgs {
    /// Log filter to use, falling back to `info` for unknown levels
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}
