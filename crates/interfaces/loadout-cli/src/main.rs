use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use loadout_cli::commands;
use loadout_cli::context::AppContext;
use loadout_cli::CliGcMode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Directory holding the state database, file store and catalogue
    #[arg(long, global = true, env = "LOADOUT_DATA_DIR")]
    data_dir: Option<Utf8PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage game installations
    Install {
        #[command(subcommand)]
        command: InstallCommands,
    },
    /// Manage loadouts of an installation
    Loadout {
        #[command(subcommand)]
        command: LoadoutCommands,
    },
    /// Manage the catalogue of vanilla game files
    Catalogue {
        #[command(subcommand)]
        command: CatalogueCommands,
    },
    /// Show what applying a loadout would change on disk
    #[command(alias = "plan")]
    Diff {
        install: String,
        loadout: String,
        #[arg(long)]
        json: bool,
    },
    /// Apply a loadout to its installation
    Sync {
        install: String,
        loadout: String,
        #[arg(short, long, default_value_t = loadout_config::DEFAULT_HASH_THREADS)]
        threads: usize,
        #[arg(long, help = "Abort when more than this many MB would be backed up")]
        max_backup_mb: Option<u64>,
        #[arg(long, help = "Re-hash every file instead of trusting timestamps")]
        ignore_modified_dates: bool,
        #[arg(long, value_enum, default_value_t = CliGcMode::Sync)]
        gc: CliGcMode,
    },
    /// Re-index the files of an installation
    Rescan {
        install: String,
        #[arg(long)]
        force: bool,
    },
    /// Ingest the active loadout and restore the vanilla game files
    Deactivate { install: String },
    /// Delete every loadout and stop tracking an installation
    Unmanage {
        install: String,
        #[arg(long, help = "Leave the game folder as it is")]
        keep_files: bool,
        #[arg(long)]
        skip_gc: bool,
    },
    /// Remove stored files nothing references anymore
    Gc,
}

#[derive(Subcommand)]
enum InstallCommands {
    List,
    Add {
        game: String,
        path: Utf8PathBuf,
        #[arg(long, default_value = "steam")]
        store: String,
        #[arg(long = "locator-id", help = "Store build identifier (repeatable)")]
        locator_ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum LoadoutCommands {
    List {
        install: String,
    },
    Create {
        install: String,
        #[arg(long)]
        name: Option<String>,
    },
    Copy {
        install: String,
        loadout: String,
    },
    Delete {
        install: String,
        loadout: String,
        #[arg(long, value_enum, default_value_t = CliGcMode::Sync)]
        gc: CliGcMode,
    },
    /// Store a file and add it to a mod of the loadout
    AddFile {
        install: String,
        loadout: String,
        #[arg(long = "mod")]
        mod_name: String,
        source: Utf8PathBuf,
        /// Destination relative to the game folder
        target: String,
    },
}

#[derive(Subcommand)]
enum CatalogueCommands {
    /// Record every file of a clean game folder as a known build
    Import {
        path: Utf8PathBuf,
        #[arg(long, default_value = "steam")]
        store: String,
        #[arg(long = "locator-id", required = true)]
        locator_ids: Vec<String>,
        #[arg(long = "game-version")]
        version: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = AppContext::open(cli.data_dir)?;

    match cli.command {
        Commands::Install { command } => match command {
            InstallCommands::List => commands::cmd_install_list(&ctx)?,
            InstallCommands::Add {
                game,
                path,
                store,
                locator_ids,
            } => {
                commands::cmd_install_add(&ctx, game, store, path, locator_ids)?;
            }
        },
        Commands::Loadout { command } => match command {
            LoadoutCommands::List { install } => commands::cmd_loadout_list(&ctx, &install)?,
            LoadoutCommands::Create { install, name } => {
                commands::cmd_loadout_create(&ctx, &install, name).await?;
            }
            LoadoutCommands::Copy { install, loadout } => {
                commands::cmd_loadout_copy(&ctx, &install, &loadout)?;
            }
            LoadoutCommands::Delete {
                install,
                loadout,
                gc,
            } => commands::cmd_loadout_delete(&ctx, &install, &loadout, gc).await?,
            LoadoutCommands::AddFile {
                install,
                loadout,
                mod_name,
                source,
                target,
            } => {
                commands::cmd_loadout_add_file(&ctx, &install, &loadout, &mod_name, source, &target)
                    .await?;
            }
        },
        Commands::Catalogue { command } => match command {
            CatalogueCommands::Import {
                path,
                store,
                locator_ids,
                version,
            } => {
                commands::cmd_catalogue_import(&ctx, path, store, locator_ids, version).await?;
            }
        },
        Commands::Diff {
            install,
            loadout,
            json,
        } => {
            commands::cmd_diff(&ctx, &install, &loadout, json).await?;
        }
        Commands::Sync {
            install,
            loadout,
            threads,
            max_backup_mb,
            ignore_modified_dates,
            gc,
        } => {
            commands::cmd_sync(
                &ctx,
                &install,
                &loadout,
                threads,
                max_backup_mb,
                ignore_modified_dates,
                gc,
            )
            .await?;
        }
        Commands::Rescan { install, force } => {
            commands::cmd_rescan(&ctx, &install, force).await?;
        }
        Commands::Deactivate { install } => {
            commands::cmd_deactivate(&ctx, &install).await?;
        }
        Commands::Unmanage {
            install,
            keep_files,
            skip_gc,
        } => commands::cmd_unmanage(&ctx, &install, keep_files, skip_gc).await?,
        Commands::Gc => {
            commands::cmd_gc(&ctx).await?;
        }
    }

    Ok(())
}
