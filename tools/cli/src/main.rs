//! EnvSync CLI - manage environment variables in an encrypted vault.
//!
//! Every command runs against the vault in the data directory. Commands
//! that touch vault contents unlock it first with the master password from
//! `ENVSYNC_PASSWORD` or an interactive prompt.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use envsync_app::{
    validate_new_password, LockMode, LockView, SessionController, Settings, SubmitOutcome,
    VaultController, VaultStatus,
};
use envsync_common::SecretString;
use envsync_vault::{Environment, EnvironmentType, Variable};

const PASSWORD_ENV: &str = "ENVSYNC_PASSWORD";

#[derive(Parser)]
#[command(name = "envsync")]
#[command(about = "EnvSync - Encrypted environment variable management")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the vault (overrides ENVSYNC_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init,

    /// Show vault status.
    Status,

    /// Change the master password.
    ChangePassword,

    /// Manage projects.
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage environments of a project.
    #[command(subcommand)]
    Env(EnvCommand),

    /// Manage variables of an environment.
    #[command(subcommand)]
    Var(VarCommand),

    /// Search variables by key across all projects.
    Search {
        /// Case-insensitive key substring.
        query: String,
    },

    /// Export an environment as a .env file.
    Export {
        project: String,
        env: String,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a .env file into an environment.
    Import {
        project: String,
        env: String,

        /// The .env file to read.
        file: PathBuf,
    },

    /// Show recent audit entries.
    Audit {
        /// Number of entries to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Verify the hash chain.
        #[arg(long)]
        verify: bool,

        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// List projects.
    List,

    /// Create a project with Development, Staging and Production.
    Add {
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Rename a project.
    Rename {
        /// Project name or id.
        project: String,
        new_name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a project and everything in it.
    Remove {
        /// Project name or id.
        project: String,
    },
}

#[derive(Subcommand)]
enum EnvCommand {
    /// List environments of a project.
    List { project: String },

    /// Add an environment.
    Add {
        project: String,
        name: String,

        /// development, staging, production or a custom name.
        #[arg(short = 't', long = "type")]
        env_type: Option<String>,
    },

    /// Delete an environment and its variables.
    Remove { project: String, env: String },
}

#[derive(Subcommand)]
enum VarCommand {
    /// List variables; secret values are masked unless --reveal is given.
    List {
        project: String,
        env: String,

        #[arg(long)]
        reveal: bool,
    },

    /// Create or overwrite a variable. Prompts for the value if omitted.
    Set {
        project: String,
        env: String,
        key: String,
        value: Option<String>,

        /// Store as a non-secret value.
        #[arg(long)]
        plain: bool,
    },

    /// Print a variable's value.
    Get {
        project: String,
        env: String,
        key: String,
    },

    /// Delete a variable.
    Remove {
        project: String,
        env: String,
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env().context("Invalid ENVSYNC_* configuration")?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    init_logging(cli.verbose, &settings.log_level)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "envsync", &mut std::io::stdout());
        return Ok(());
    }

    let controller = Arc::new(
        VaultController::from_settings(&settings)
            .await
            .with_context(|| format!("Failed to open data directory {}", settings.data_dir.display()))?,
    );

    match cli.command {
        Commands::Init => cmd_init(&controller, &settings.data_dir).await,
        Commands::Status => cmd_status(&controller, &settings.data_dir),
        Commands::ChangePassword => cmd_change_password(&controller).await,
        Commands::Project(cmd) => cmd_project(&controller, cmd).await,
        Commands::Env(cmd) => cmd_env(&controller, cmd).await,
        Commands::Var(cmd) => cmd_var(&controller, cmd).await,
        Commands::Search { query } => cmd_search(&controller, &query).await,
        Commands::Export {
            project,
            env,
            output,
        } => cmd_export(&controller, &project, &env, output.as_deref()).await,
        Commands::Import { project, env, file } => {
            cmd_import(&controller, &project, &env, &file).await
        }
        Commands::Audit {
            limit,
            verify,
            json,
        } => cmd_audit(&controller, limit, verify, json).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Install the tracing subscriber. Logs go to stderr so exports stay clean.
fn init_logging(verbose: bool, default_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Read the master password from the environment or prompt for it.
fn read_password(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(password));
    }
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let value = rpassword::prompt_password(prompt).context("Failed to read value")?;
    Ok(Zeroizing::new(value))
}

/// Unlock the vault through the lock view.
async fn unlock(controller: &Arc<VaultController>) -> Result<()> {
    let view = LockView::new(controller.clone());
    if view.mode() == LockMode::Setup {
        bail!("Vault not initialized. Run `envsync init` first.");
    }

    let password = read_password("Master password: ")?;
    view.set_password(&password);

    match view.submit().await {
        SubmitOutcome::Succeeded => {
            view.reset();
            Ok(())
        }
        _ => {
            let message = controller
                .error()
                .or_else(|| view.error())
                .unwrap_or_else(|| "Failed to unlock vault".to_string());
            bail!(message)
        }
    }
}

async fn resolve(controller: &VaultController, project: &str, env: &str) -> Result<Environment> {
    controller
        .resolve_environment(project, env)
        .await
        .with_context(|| format!("Unknown environment {}/{}", project, env))
}

fn mask(variable: &Variable, reveal: bool) -> String {
    if reveal || !variable.is_secret {
        variable.value.expose().to_string()
    } else {
        "*".repeat(variable.value.len().clamp(4, 12))
    }
}

/// Create a new vault.
async fn cmd_init(controller: &Arc<VaultController>, data_dir: &Path) -> Result<()> {
    if controller.is_initialized() {
        bail!("Vault already initialized at {}", data_dir.display());
    }

    let view = LockView::new(controller.clone());
    let password = read_password("Choose a master password: ")?;
    let confirm = if std::env::var(PASSWORD_ENV).is_ok() {
        password.clone()
    } else {
        read_password("Confirm master password: ")?
    };
    view.set_password(&password);
    view.set_confirm_password(&confirm);

    match view.submit().await {
        SubmitOutcome::Succeeded => {
            view.reset();
            info!("Vault created in {}", data_dir.display());
            println!("Vault created successfully!");
            println!("  Location: {}", data_dir.display());
            Ok(())
        }
        _ => bail!(view
            .error()
            .unwrap_or_else(|| "Failed to create vault".to_string())),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn format_status(status: &VaultStatus, data_dir: &Path) -> String {
    let last_activity = status
        .last_activity
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Vault Status:\n  Location: {}\n  Initialized: {}\n  Unlocked: {}\n  Last activity: {}",
        data_dir.display(),
        yes_no(status.is_initialized),
        yes_no(status.is_unlocked),
        last_activity
    )
}

fn cmd_status(controller: &VaultController, data_dir: &Path) -> Result<()> {
    println!("{}", format_status(&controller.status(), data_dir));
    Ok(())
}

async fn cmd_change_password(controller: &Arc<VaultController>) -> Result<()> {
    let current = read_password("Current master password: ")?;
    let new_password = prompt_secret("New master password: ")?;
    let confirm = prompt_secret("Confirm new master password: ")?;

    if let Err(message) = validate_new_password(&new_password, &confirm) {
        bail!(message);
    }

    let view = LockView::new(controller.clone());
    view.set_password(&current);
    if view.submit().await != SubmitOutcome::Succeeded {
        bail!(controller
            .error()
            .unwrap_or_else(|| "Invalid password".to_string()));
    }
    view.reset();

    controller
        .change_password(&current, &new_password)
        .await
        .context("Failed to change password")?;

    println!("Password changed successfully!");
    Ok(())
}

async fn cmd_project(controller: &Arc<VaultController>, cmd: ProjectCommand) -> Result<()> {
    unlock(controller).await?;

    match cmd {
        ProjectCommand::List => {
            let projects = controller.list_projects().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for project in projects {
                match &project.description {
                    Some(description) => println!("  {}  {}", project.name, description),
                    None => println!("  {}", project.name),
                }
            }
        }
        ProjectCommand::Add { name, description } => {
            let project = controller
                .create_project(&name, description.as_deref())
                .await
                .context("Failed to create project")?;
            println!("Project created: {} ({})", project.name, project.id);
        }
        ProjectCommand::Rename {
            project,
            new_name,
            description,
        } => {
            let existing = controller.get_project(&project).await?;
            let description = description.or(existing.description);
            let updated = controller
                .update_project(&existing.id, &new_name, description.as_deref())
                .await
                .context("Failed to rename project")?;
            println!("Project renamed: {} -> {}", existing.name, updated.name);
        }
        ProjectCommand::Remove { project } => {
            let existing = controller.get_project(&project).await?;
            controller.delete_project(&existing.id).await?;
            println!("Project removed: {}", existing.name);
        }
    }

    Ok(())
}

async fn cmd_env(controller: &Arc<VaultController>, cmd: EnvCommand) -> Result<()> {
    unlock(controller).await?;

    match cmd {
        EnvCommand::List { project } => {
            let project = controller.get_project(&project).await?;
            for env in controller.list_environments(&project.id).await? {
                println!("  {} [{}]", env.name, env.env_type);
            }
        }
        EnvCommand::Add {
            project,
            name,
            env_type,
        } => {
            let project = controller.get_project(&project).await?;
            let env_type = EnvironmentType::parse(env_type.as_deref().unwrap_or(&name));
            let env = controller
                .create_environment(&project.id, &name, env_type)
                .await
                .context("Failed to create environment")?;
            println!("Environment created: {}/{} [{}]", project.name, env.name, env.env_type);
        }
        EnvCommand::Remove { project, env } => {
            let environment = resolve(controller, &project, &env).await?;
            controller.delete_environment(&environment.id).await?;
            println!("Environment removed: {}/{}", project, environment.name);
        }
    }

    Ok(())
}

async fn cmd_var(controller: &Arc<VaultController>, cmd: VarCommand) -> Result<()> {
    unlock(controller).await?;

    match cmd {
        VarCommand::List {
            project,
            env,
            reveal,
        } => {
            let environment = resolve(controller, &project, &env).await?;
            let variables = controller.list_variables(&environment.id).await?;
            if variables.is_empty() {
                println!("No variables.");
            }
            for variable in variables {
                println!("{}={}", variable.key, mask(&variable, reveal));
            }
        }
        VarCommand::Set {
            project,
            env,
            key,
            value,
            plain,
        } => {
            let environment = resolve(controller, &project, &env).await?;
            let value = match value {
                Some(value) => SecretString::new(value),
                None => SecretString::new(prompt_secret(&format!("Value for {}: ", key))?.as_str()),
            };
            let variable = controller
                .set_variable(&environment.id, &key, value, !plain)
                .await
                .context("Failed to set variable")?;
            println!("Variable set: {}", variable.key);
        }
        VarCommand::Get { project, env, key } => {
            let environment = resolve(controller, &project, &env).await?;
            let variable = controller
                .get_variable_by_key(&environment.id, &key)
                .await?;
            println!("{}", variable.value.expose());
        }
        VarCommand::Remove { project, env, key } => {
            let environment = resolve(controller, &project, &env).await?;
            let variable = controller
                .get_variable_by_key(&environment.id, &key)
                .await?;
            controller.delete_variable(&variable.id).await?;
            println!("Variable removed: {}", key);
        }
    }

    Ok(())
}

async fn cmd_search(controller: &Arc<VaultController>, query: &str) -> Result<()> {
    unlock(controller).await?;

    let hits = controller.search(query).await?;
    if hits.is_empty() {
        println!("No matches for '{}'.", query);
    }
    for hit in hits {
        println!(
            "  {}/{}: {}",
            hit.project.name, hit.environment.name, hit.variable.key
        );
    }
    Ok(())
}

async fn cmd_export(
    controller: &Arc<VaultController>,
    project: &str,
    env: &str,
    output: Option<&Path>,
) -> Result<()> {
    unlock(controller).await?;

    let environment = resolve(controller, project, env).await?;
    let text = Zeroizing::new(controller.export_env(&environment.id).await?);

    match output {
        Some(path) => {
            tokio::fs::write(path, text.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {}/{} to {}", project, environment.name, path.display());
        }
        None => print!("{}", text.as_str()),
    }
    Ok(())
}

async fn cmd_import(
    controller: &Arc<VaultController>,
    project: &str,
    env: &str,
    file: &Path,
) -> Result<()> {
    let content = Zeroizing::new(
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?,
    );

    unlock(controller).await?;

    let environment = resolve(controller, project, env).await?;
    let count = controller.import_env(&environment.id, &content).await?;
    println!("Imported {} variables into {}/{}", count, project, environment.name);
    Ok(())
}

async fn cmd_audit(
    controller: &Arc<VaultController>,
    limit: usize,
    verify: bool,
    json: bool,
) -> Result<()> {
    unlock(controller).await?;

    let log = controller
        .audit_log()
        .context("Audit log is not available")?;

    if verify {
        if log.verify_chain()? {
            println!("Audit chain intact.");
        } else {
            bail!("Audit chain verification failed");
        }
    }

    let entries = log.recent(limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in entries {
        let target = entry.target.as_deref().unwrap_or("-");
        println!(
            "{:>5}  {}  {:<22} {}",
            entry.seq,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.event,
            target
        );
    }
    Ok(())
}
