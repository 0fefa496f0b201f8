use std::sync::Mutex;
use std::thread;

use clap::Parser;

use snapvault_lib::catalog::{Catalog, Method};
use snapvault_lib::cleanup::{delete_snapshot, CleanupEngine};
use snapvault_lib::cli::{Action, Cli};
use snapvault_lib::config::{AppConfig, DirectResolver, ServerConfig, TunnelResolver};
use snapvault_lib::drivers::driver_for;
use snapvault_lib::notify::LogNotifier;
use snapvault_lib::tasks::backup::BackupTask;
use snapvault_lib::tasks::restore::RestoreTask;
use snapvault_lib::util::clock::SystemClock;
use snapvault_lib::verify::VerificationEngine;

fn main() {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let config = match AppConfig::load_or_init(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Reading the config file failed: {e}");
            return;
        }
    };
    let mut catalog = match Catalog::load(&cli.catalog) {
        Ok(catalog) => catalog,
        Err(e) => {
            log::error!("Reading the catalog failed: {e}");
            return;
        }
    };

    let changed = match &cli.action {
        Action::Backup { server, method } => {
            run_backup(&config, &mut catalog, server.as_deref(), *method)
        }
        Action::Restore { snapshot, server, database, actor } => run_restore(
            &config,
            &mut catalog,
            *snapshot,
            server,
            database.as_deref(),
            actor.clone(),
        ),
        Action::Cleanup { dry_run } => run_cleanup(&config, &mut catalog, *dry_run),
        Action::Verify => {
            let volume = config.volume.filesystem();
            let engine = VerificationEngine {
                volume: &*volume,
                clock: &SystemClock,
                notifier: &LogNotifier,
            };
            let checked = engine.sweep(&mut catalog);
            log::info!("Verified {checked} snapshot artifact(s)");
            true
        }
        Action::Delete { snapshot } => {
            let volume = config.volume.filesystem();
            delete_snapshot(&mut catalog, &*volume, *snapshot)
        }
        Action::ListDatabases { server } => {
            list_databases(&config, server);
            false
        }
        Action::TestConnection { server } => {
            test_connection(&config, server);
            false
        }
    };

    if changed {
        if let Err(e) = catalog.save(&cli.catalog) {
            log::error!("Writing the catalog to {} failed: {e}", cli.catalog.display());
        }
    }
}

fn find_server<'a>(config: &'a AppConfig, name: &str) -> Option<&'a ServerConfig> {
    let server = config.servers.iter().find(|s| s.name == name);
    if server.is_none() {
        log::error!("No server named {name} is configured");
    }
    server
}

fn run_backup(
    config: &AppConfig,
    catalog: &mut Catalog,
    only_server: Option<&str>,
    method: Method,
) -> bool {
    let volume = config.volume.filesystem();
    let resolver = DirectResolver;
    let shared = Mutex::new(std::mem::take(catalog));

    for server in &config.servers {
        if only_server.is_some_and(|name| name != server.name) {
            continue;
        }
        let endpoint = resolver.resolve(server);

        let databases = if server.databases.is_empty() {
            match driver_for(server, &endpoint, "", None).and_then(|d| d.list_databases()) {
                Ok(databases) => databases,
                Err(e) => {
                    log::error!(target: "backup", "Listing databases of {} failed: {e}", server.name);
                    continue;
                }
            }
        } else {
            server.databases.clone()
        };
        if databases.is_empty() {
            log::error!(target: "backup", "Server {} has no databases to back up", server.name);
            continue;
        }

        // one thread per logical database
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(databases.len());
            for database in &databases {
                let endpoint = endpoint.clone();
                let shared = &shared;
                let volume = &*volume;
                handles.push((
                    database.clone(),
                    scope.spawn(move || {
                        let driver = driver_for(server, &endpoint, database, None)?;
                        let task = BackupTask {
                            server,
                            database: database.clone(),
                            volume,
                            compression: &config.compression,
                            working_dir: &config.working_dir,
                            method,
                            clock: &SystemClock,
                            notifier: &LogNotifier,
                        };
                        task.run(shared, &*driver).map_err(Into::into)
                    }),
                ));
            }

            for (database, handle) in handles {
                let result: Result<u64, Box<dyn std::error::Error + Send + Sync>> =
                    handle.join().expect("no panic in backup pipeline");
                match result {
                    Ok(snapshot) => log::info!(
                        target: "backup",
                        "Backup of {}/{database} completed as snapshot {snapshot}",
                        server.name
                    ),
                    Err(e) => log::error!(
                        target: "backup",
                        "Backup of {}/{database} failed: {e}",
                        server.name
                    ),
                }
            }
        });
    }

    resolver.close();
    *catalog = shared.into_inner().expect("catalog mutex poisoned");
    true
}

fn run_restore(
    config: &AppConfig,
    catalog: &mut Catalog,
    snapshot_id: u64,
    server_name: &str,
    database: Option<&str>,
    actor: Option<String>,
) -> bool {
    let Some(server) = find_server(config, server_name) else {
        return false;
    };
    let Some(snapshot) = catalog.snapshot(snapshot_id).cloned() else {
        log::error!("Snapshot {snapshot_id} does not exist");
        return false;
    };

    let volume = config.volume.filesystem();
    let resolver = DirectResolver;
    let endpoint = resolver.resolve(server);
    let schema = database.unwrap_or(&snapshot.database_name).to_string();

    let driver = match driver_for(server, &endpoint, &schema, Some(&snapshot.database_name)) {
        Ok(driver) => driver,
        Err(e) => {
            log::error!(target: "restore", "No driver for {}: {e}", server.name);
            return false;
        }
    };

    let task = RestoreTask {
        server,
        snapshot: &snapshot,
        schema: schema.clone(),
        volume: &*volume,
        compression: &config.compression,
        working_dir: &config.working_dir,
        method: Method::Manual,
        actor,
        clock: &SystemClock,
        notifier: &LogNotifier,
    };

    let jobs_before = catalog.jobs.len();
    let shared = Mutex::new(std::mem::take(catalog));
    let result = task.run(&shared, &*driver);
    *catalog = shared.into_inner().expect("catalog mutex poisoned");
    resolver.close();

    match result {
        Ok(restore) => {
            log::info!(
                target: "restore",
                "Restore of snapshot {snapshot_id} into {}/{schema} completed as restore {restore}",
                server.name
            );
            true
        }
        Err(e) => {
            log::error!(
                target: "restore",
                "Restore of snapshot {snapshot_id} into {}/{schema} failed: {e}",
                server.name
            );
            // Validation failures leave no records behind.
            catalog.jobs.len() != jobs_before
        }
    }
}

fn run_cleanup(config: &AppConfig, catalog: &mut Catalog, dry_run: bool) -> bool {
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let volume = config.volume.filesystem();
    let engine = CleanupEngine { volume: &*volume, clock: &SystemClock, dry_run };

    let mut deleted = 0;
    for server in &config.servers {
        let policy = config.retention_for(server);
        deleted += engine.run(catalog, &server.name, &policy).len();
    }
    log::info!(target: "cleanup", "{deleted} snapshot(s) affected");
    !dry_run && deleted > 0
}

fn list_databases(config: &AppConfig, server_name: &str) {
    let Some(server) = find_server(config, server_name) else {
        return;
    };
    let endpoint = DirectResolver.resolve(server);

    match driver_for(server, &endpoint, "", None).and_then(|d| d.list_databases()) {
        Ok(databases) => {
            for database in databases {
                println!("{database}");
            }
        }
        Err(e) => log::error!("Listing databases of {server_name} failed: {e}"),
    }
}

fn test_connection(config: &AppConfig, server_name: &str) {
    let Some(server) = find_server(config, server_name) else {
        return;
    };
    let endpoint = DirectResolver.resolve(server);

    match driver_for(server, &endpoint, "", None) {
        Ok(driver) => println!("{server_name}: {}", driver.test_connection()),
        Err(e) => log::error!("No driver for {server_name}: {e}"),
    }
}
