//! Setup and project registration commands.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};

use ensemble::catalog::{Project, SqliteCatalog};
use ensemble::config::{CONFIG_FILE_NAME, EnsembleConfig};

use super::super::ProjectCommands;
use super::{Context, format_time};

pub async fn cmd_init(
    config_path: Option<&Path>,
    path: Option<PathBuf>,
    database: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let target = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    let config = if target.exists() && !force {
        println!("Config already exists at {}", target.display());
        EnsembleConfig::load(&target)?
    } else {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let mut config = EnsembleConfig {
            path: path.unwrap_or_else(|| cwd.join("projects")),
            ..EnsembleConfig::default()
        };
        if let Some(database) = database {
            config.database = database;
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        config.save(&target)?;
        println!("Wrote {}", target.display());
        config
    };

    let config = config.with_env_overrides(|key| std::env::var(key).ok());
    config.ensure_directories()?;
    SqliteCatalog::open(&config.database, &config.secret)?;

    println!("  projects: {}", config.path.display());
    println!("  catalog:  {}", config.database.display());
    if config.secret.is_empty() {
        println!(
            "  {}",
            console::style("secret is empty, credentials will be stored unencrypted").yellow()
        );
    }
    Ok(())
}

pub async fn cmd_project(ctx: &Context, command: ProjectCommands) -> Result<()> {
    match command {
        ProjectCommands::Add {
            name,
            url,
            branch,
            description,
            login,
            password,
            vault_password,
        } => {
            if name.trim().is_empty() {
                bail!("Project name must not be empty");
            }
            let mut project = Project::new(name, url);
            project.repository_branch = branch;
            project.description = description;
            project.repository_login = login.unwrap_or_default();
            project.repository_password = password.unwrap_or_default();
            project.vault_password = vault_password.unwrap_or_default();
            ctx.catalog.insert_project(&project).await?;
            println!("Added project {} ({})", project.name, project.id);
            println!("Run `ensemble sync {}` to fetch it.", project.id);
        }
        ProjectCommands::List => {
            let projects = ctx.catalog.list_projects().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for project in projects {
                println!(
                    "{}  {}  {} ({})",
                    project.id,
                    console::style(&project.name).bold(),
                    project.repository_url,
                    project.repository_branch
                );
            }
        }
        ProjectCommands::Show { project } => {
            let project = ctx.project(&project).await?;
            show_project(ctx, &project).await?;
        }
        ProjectCommands::Select {
            project,
            inventory,
            variables,
        } => {
            let mut project = ctx.project(&project).await?;
            if let Some(inventory) = inventory {
                if !project.inventory_list.contains(&inventory) {
                    bail!(
                        "Inventory '{}' not found, available: {}",
                        inventory,
                        project.inventory_list.join(", ")
                    );
                }
                project.inventory = inventory;
            }
            if let Some(variables) = variables {
                if !variables.is_empty() && !project.variables_list.contains(&variables) {
                    bail!(
                        "Variables file '{}' not found, available: {}",
                        variables,
                        project.variables_list.join(", ")
                    );
                }
                project.variables = variables;
            }
            ctx.catalog.update_project(&project).await?;
            println!(
                "Project {} runs with inventory {} and variables {}",
                project.name,
                project.inventory,
                display_or_none(&project.variables)
            );
        }
        ProjectCommands::Remove { project } => {
            let project = ctx.project(&project).await?;
            ctx.catalog.delete_project(&project.id).await?;
            println!("Removed project {}", project.name);
        }
    }
    Ok(())
}

async fn show_project(ctx: &Context, project: &Project) -> Result<()> {
    println!("{}", console::style(&project.name).bold().cyan());
    println!("  id:          {}", project.id);
    if !project.description.is_empty() {
        println!("  description: {}", project.description);
    }
    println!("  repository:  {} ({})", project.repository_url, project.repository_branch);
    println!("  created:     {}", format_time(&project.created_at));
    println!(
        "  inventory:   {} [{}]",
        project.inventory,
        project.inventory_list.join(", ")
    );
    println!(
        "  variables:   {} [{}]",
        display_or_none(&project.variables),
        project.variables_list.join(", ")
    );
    println!("  vars/main:   {}", project.variables_main);
    println!("  vault:       {}", project.variables_vault);
    if !project.collections_list.is_empty() {
        println!("  collections: {}", project.collections_list.join(", "));
    }

    match ctx.catalog.latest_project_update(&project.id).await? {
        Some(update) => println!(
            "  last sync:   {} {} {}",
            format_time(&update.date),
            if update.success {
                console::style("ok").green()
            } else {
                console::style("failed").red()
            },
            update.revision
        ),
        None => println!("  last sync:   never"),
    }
    Ok(())
}

fn display_or_none(value: &str) -> &str {
    if value.is_empty() { "(none)" } else { value }
}
