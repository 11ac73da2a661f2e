//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::permission::Access;

/// Route-level authorization administration
#[derive(Parser, Debug)]
#[command(name = "route-guard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ROUTE_GUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "ROUTE_GUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ROUTE_GUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Route table management
    #[command(subcommand)]
    Route(RouteCommand),

    /// Permission table management
    #[command(subcommand)]
    Permission(PermissionCommand),

    /// Decide whether a caller may reach a route
    Check {
        /// Route identity (Area.Controller.Action)
        route: String,

        /// Caller role bitmask
        #[arg(long, conflicts_with = "anonymous")]
        roles: Option<i64>,

        /// Check as an anonymous caller
        #[arg(long)]
        anonymous: bool,
    },

    /// Generate a cookie encryption key
    Keygen,

    /// List store keys matching a glob pattern
    Keys {
        /// Glob pattern (e.g. "ecp:*")
        #[arg(default_value = "*")]
        pattern: String,

        /// Keys requested per SCAN page
        #[arg(long, default_value_t = 100, value_parser = parse_page_size)]
        page_size: usize,
    },

    /// Render a `{{URI 'name'}}` template from the URL table
    Url {
        /// Template to render
        template: String,
    },
}

/// Route subcommands
#[derive(Subcommand, Debug)]
pub enum RouteCommand {
    /// Create or replace a route
    Add(RouteArgs),

    /// Show one route
    Get {
        /// Route ID
        id: String,
    },

    /// List all routes
    List,

    /// Delete a route
    Remove {
        /// Route ID
        id: String,
    },
}

/// Fields of a route
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Route ID
    pub id: String,

    /// Route identity (Area.Controller.Action)
    pub route: String,
}

/// Permission subcommands
#[derive(Subcommand, Debug)]
pub enum PermissionCommand {
    /// Create or replace a permission
    Add(PermissionArgs),

    /// Show one permission
    Get {
        /// Permission ID
        id: String,
    },

    /// List all permissions
    List,

    /// Delete a permission
    Remove {
        /// Permission ID
        id: String,
    },
}

/// Fields of a permission
#[derive(Args, Debug)]
pub struct PermissionArgs {
    /// Permission ID
    pub id: String,

    /// Covered route IDs (comma separated)
    #[arg(long, value_delimiter = ',', required = true)]
    pub routes: Vec<String>,

    /// Required role bitmask (accepts 0b/0x prefixes)
    #[arg(long, default_value = "0", value_parser = parse_roles)]
    pub roles: i64,

    /// Access kind
    #[arg(long, value_enum, default_value_t = AccessArg::Roles)]
    pub access: AccessArg,
}

/// Access kind as given on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessArg {
    /// Role bitmask must intersect
    Roles,
    /// Any signed-in caller
    Authenticated,
    /// Everyone
    Anonymous,
}

impl From<AccessArg> for Access {
    fn from(arg: AccessArg) -> Self {
        match arg {
            AccessArg::Roles => Self::Roles,
            AccessArg::Authenticated => Self::Authenticated,
            AccessArg::Anonymous => Self::Anonymous,
        }
    }
}

/// Parse a role bitmask in decimal, `0b` binary or `0x` hex.
pub fn parse_roles(value: &str) -> Result<i64, String> {
    let value = value.trim().replace('_', "");
    let parsed = if let Some(bits) = value.strip_prefix("0b") {
        i64::from_str_radix(bits, 2)
    } else if let Some(hex) = value.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|e| format!("invalid role mask '{value}': {e}"))
}

/// Parse a SCAN page size; zero is rejected.
pub fn parse_page_size(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("page size must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid page size '{value}': {e}")),
    }
}
