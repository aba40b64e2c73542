//! # psync CLI
//!
//! Command-line interface for local-first project storage backed by a
//! Drive-style cloud file store.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `psync init` | Create the local databases |
//! | `psync login` / `logout` / `whoami` | Manage the signed-in identity |
//! | `psync users` | List identities seen on this device |
//! | `psync projects list\|add\|show\|rm` | Manage local projects |
//! | `psync sync` | Initial reconciliation with the remote store |
//! | `psync push` | Push every local project now |
//! | `psync remote list\|rm` | Inspect remote project files |
//! | `psync kb pull\|push` | Download or upload the knowledge-base file |
//! | `psync shared set\|clear\|show` | Switch to a shared repository folder |
//! | `psync completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! psync --config ./config/psync.toml init
//! psync login
//! psync projects add "Supplier review" --doc ./soc2.txt
//! psync sync --progress json
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use project_sync::progress::ProgressMode;
use project_sync::{commands, config, logging, migrate};

/// Local-first project storage with a cloud file store as the durable
/// backing store.
#[derive(Parser)]
#[command(
    name = "psync",
    about = "Local-first project persistence and sync",
    version,
    long_about = "psync keeps compliance-assessment projects in a per-user local store and \
    synchronizes them with a Drive-style cloud file store: one JSON file per project plus a \
    shared knowledge-base file."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/psync.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Raise log verbosity (-v, -vv). `RUST_LOG` applies otherwise.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local key-value and document text databases.
    ///
    /// Idempotent. Also upgrades an older document text database in place.
    Init,

    /// Sign in to the remote store and make that account the active identity.
    Login,

    /// Forget the current session and its stored refresh token.
    Logout,

    /// Show the active identity.
    Whoami,

    /// List every identity that has signed in on this device.
    Users,

    /// Manage the active identity's local projects.
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },

    /// Reconcile local projects with the remote store.
    ///
    /// Remote copies replace local ones with the same id; local-only
    /// projects are uploaded.
    Sync,

    /// Upload every local project now.
    Push,

    /// Inspect remote project files.
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },

    /// Download or upload the global knowledge-base file.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Configure the shared repository folder.
    Shared {
        #[command(subcommand)]
        action: SharedAction,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProjectsAction {
    /// List projects (the active one is marked with `*`).
    List,
    /// Create a project and make it active.
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Plain-text file to attach as an uploaded document. Repeatable.
        #[arg(long = "doc")]
        docs: Vec<PathBuf>,
    },
    /// Print a project as JSON, with document text reattached.
    Show { id: String },
    /// Delete a project locally.
    Rm {
        id: String,
        /// Also delete the project's remote file.
        #[arg(long)]
        remote: bool,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// List remote project files, newest first.
    List,
    /// Delete a remote file by id.
    Rm { file_id: String },
}

#[derive(Subcommand)]
enum KbAction {
    /// Download the knowledge-base file (stdout unless `--out`).
    Pull {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Upload a knowledge-base JSON file.
    Push { file: PathBuf },
}

#[derive(Subcommand)]
enum SharedAction {
    /// Store projects and knowledge bases under a shared folder.
    Set {
        folder_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Go back to the private application folder.
    Clear,
    /// Show the active repository mode.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "psync", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Local databases initialized.");
        }
        Commands::Login => commands::run_login(&cfg).await?,
        Commands::Logout => commands::run_logout(&cfg).await?,
        Commands::Whoami => commands::run_whoami(&cfg).await?,
        Commands::Users => commands::run_users(&cfg).await?,
        Commands::Projects { action } => match action {
            ProjectsAction::List => commands::run_projects_list(&cfg).await?,
            ProjectsAction::Add {
                name,
                description,
                docs,
            } => commands::run_projects_add(&cfg, &name, description, &docs).await?,
            ProjectsAction::Show { id } => commands::run_projects_show(&cfg, &id).await?,
            ProjectsAction::Rm { id, remote } => {
                commands::run_projects_rm(&cfg, &id, remote).await?
            }
        },
        Commands::Sync => commands::run_sync(&cfg, progress).await?,
        Commands::Push => commands::run_push(&cfg, progress).await?,
        Commands::Remote { action } => match action {
            RemoteAction::List => commands::run_remote_list(&cfg).await?,
            RemoteAction::Rm { file_id } => commands::run_remote_rm(&cfg, &file_id).await?,
        },
        Commands::Kb { action } => match action {
            KbAction::Pull { out } => commands::run_kb_pull(&cfg, out.as_deref()).await?,
            KbAction::Push { file } => commands::run_kb_push(&cfg, &file).await?,
        },
        Commands::Shared { action } => match action {
            SharedAction::Set { folder_id, name } => {
                commands::run_shared_set(&cfg, &folder_id, name).await?
            }
            SharedAction::Clear => commands::run_shared_clear(&cfg).await?,
            SharedAction::Show => commands::run_shared_show(&cfg).await?,
        },
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["psync", "sync", "--progress", "json", "-vv"]).unwrap();
        assert_eq!(cli.progress, Some(ProgressMode::Json));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Sync));
    }
}
