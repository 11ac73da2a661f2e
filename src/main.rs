//! route-guard - administration CLI for route permissions

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{debug, error};

use route_guard::{
    cli::{Cli, Command, PermissionArgs, PermissionCommand, RouteArgs, RouteCommand},
    config::Config,
    cookie::AesGcmSecureCookie,
    kv::{self, KvStore},
    permission::{Caller, Permission, PermissionAuditor, PermissionStore, Route},
    route::RouteIdentity,
    setup_tracing,
    url_provider::UrlProvider,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Keygen => {
            println!("{}", AesGcmSecureCookie::generate_key());
            Ok(ExitCode::SUCCESS)
        }
        Command::Route(cmd) => {
            let store = PermissionStore::from_config(connect(&config).await?, &config);
            run_route_command(store, cmd).await
        }
        Command::Permission(cmd) => {
            let store = PermissionStore::from_config(connect(&config).await?, &config);
            run_permission_command(store, cmd).await
        }
        Command::Check {
            route,
            roles,
            anonymous,
        } => {
            let store = PermissionStore::from_config(connect(&config).await?, &config);
            run_check(store, &config, &route, roles, anonymous).await
        }
        Command::Keys { pattern, page_size } => {
            let kv = connect(&config).await?;
            run_keys(kv.as_ref(), &pattern, page_size).await
        }
        Command::Url { template } => {
            let provider = UrlProvider::from_config(connect(&config).await?, &config);
            println!("{}", provider.render_url(&template).await?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    let kv = kv::connect(&config.store)
        .await
        .context("Failed to connect to the store")?;
    debug!(project = %config.project, "Store connected");
    Ok(kv)
}

/// Run route table commands
async fn run_route_command(store: PermissionStore, cmd: RouteCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        RouteCommand::Add(RouteArgs { id, route }) => {
            let identity = RouteIdentity::parse(&route)?;
            let route = Route {
                id,
                area: identity.area,
                controller: identity.controller,
                action: identity.action,
            };
            store.create_route(&route).await?;
            println!("✅ route {} -> {}.{}.{}", route.id, route.area, route.controller, route.action);
        }
        RouteCommand::Get { id } => {
            let route = store.get_route(&id).await?;
            println!("{}", serde_json::to_string_pretty(&route)?);
        }
        RouteCommand::List => {
            let mut routes: Vec<Route> = store.get_routes().await?.into_values().collect();
            routes.sort_by(|a, b| a.id.cmp(&b.id));
            if routes.is_empty() {
                println!("No routes in {}", store.routes_key());
            }
            for route in routes {
                println!("  {:<24} {}.{}.{}", route.id, route.area, route.controller, route.action);
            }
        }
        RouteCommand::Remove { id } => {
            store.remove_route(&id).await?;
            println!("✅ route {id} removed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Run permission table commands
async fn run_permission_command(
    store: PermissionStore,
    cmd: PermissionCommand,
) -> anyhow::Result<ExitCode> {
    match cmd {
        PermissionCommand::Add(PermissionArgs {
            id,
            routes,
            roles,
            access,
        }) => {
            let permission = Permission {
                id,
                route_ids: routes,
                roles,
                access: access.into(),
            };
            store.create_permission(&permission).await?;
            println!(
                "✅ permission {} ({:?}, roles {:#b}) over {}",
                permission.id,
                permission.access,
                permission.roles,
                permission.route_ids.join(", ")
            );
        }
        PermissionCommand::Get { id } => {
            let permission = store.get_permission(&id).await?;
            println!("{}", serde_json::to_string_pretty(&permission)?);
        }
        PermissionCommand::List => {
            let mut permissions: Vec<Permission> =
                store.get_permissions().await?.into_values().collect();
            permissions.sort_by(|a, b| a.id.cmp(&b.id));
            if permissions.is_empty() {
                println!("No permissions in {}", store.permissions_key());
            }
            for p in permissions {
                println!(
                    "  {:<24} {:<14} {:#010b}  {}",
                    p.id,
                    format!("{:?}", p.access),
                    p.roles,
                    p.route_ids.join(", ")
                );
            }
        }
        PermissionCommand::Remove { id } => {
            store.remove_permission(&id).await?;
            println!("✅ permission {id} removed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Decide a route for a caller; exits non-zero when denied
async fn run_check(
    store: PermissionStore,
    config: &Config,
    route: &str,
    roles: Option<i64>,
    anonymous: bool,
) -> anyhow::Result<ExitCode> {
    let identity = RouteIdentity::parse(route)?;
    let caller = match (roles, anonymous) {
        (_, true) => Caller::Anonymous,
        (Some(roles), false) => Caller::Authenticated { roles },
        (None, false) => bail!("pass --roles <mask> or --anonymous"),
    };

    let auditor = PermissionAuditor::new(store, &config.auditor);
    if auditor.check_route(&identity, &caller).await? {
        println!("✅ allowed: {identity}");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("⛔ denied: {identity}");
        Ok(ExitCode::FAILURE)
    }
}

/// List keys page by page
async fn run_keys(kv: &dyn KvStore, pattern: &str, page_size: usize) -> anyhow::Result<ExitCode> {
    let keys = kv::get_all_keys(kv, pattern, page_size).await?;
    for key in &keys {
        println!("{key}");
    }
    debug!(count = keys.len(), pattern, "Keys listed");
    Ok(ExitCode::SUCCESS)
}
