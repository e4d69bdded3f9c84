//! Repository sync and playbook listing commands.

use std::sync::Arc;

use anyhow::{Result, bail};

use ensemble::catalog::ProjectUpdate;
use ensemble::exec::ProcessExecutor;
use ensemble::repository::SyncManager;

use super::Context;

pub async fn cmd_sync(ctx: &Context, project: Option<&str>, all: bool) -> Result<()> {
    let manager = SyncManager::new(
        ctx.config.repository(),
        ctx.catalog.clone(),
        Arc::new(ProcessExecutor),
    );

    if all {
        manager.update_all().await;
        for project in ctx.catalog.list_projects().await? {
            match ctx.catalog.latest_project_update(&project.id).await? {
                Some(update) => print_update(&project.name, &update),
                None => println!("{}: never synced", project.name),
            }
        }
        return Ok(());
    }

    let Some(key) = project else {
        bail!("Name a project or pass --all");
    };
    let project = ctx.project(key).await?;
    let update = manager.update(&project).await?;
    print_update(&project.name, &update);
    if !update.success {
        println!();
        print!("{}", update.log);
        bail!("Sync of {} failed", project.name);
    }
    Ok(())
}

fn print_update(name: &str, update: &ProjectUpdate) {
    if update.success {
        println!(
            "{} {} at {}",
            console::style("✓").green(),
            name,
            update.revision
        );
    } else {
        println!("{} {} failed", console::style("✗").red(), name);
    }
}

pub async fn cmd_playbooks(ctx: &Context, project: &str) -> Result<()> {
    let project = ctx.project(project).await?;
    let playbooks = ctx.catalog.list_playbooks(&project.id).await?;
    if playbooks.is_empty() {
        println!("No playbooks in {}. Has it been synced?", project.name);
        return Ok(());
    }
    for playbook in playbooks {
        let title = if playbook.name.is_empty() {
            playbook.filename.clone()
        } else {
            format!("{} ({})", playbook.name, playbook.filename)
        };
        let lock = if playbook.locked {
            console::style(" [locked]").yellow().to_string()
        } else {
            String::new()
        };
        println!("{}  {}{}", playbook.id, console::style(title).bold(), lock);
        for line in playbook.description.lines() {
            println!("    {}", console::style(line).dim());
        }
    }
    Ok(())
}

pub async fn cmd_lock(ctx: &Context, playbook: &str, locked: bool) -> Result<()> {
    let playbook = ctx.playbook(playbook).await?;
    ctx.catalog.set_playbook_lock(&playbook.id, locked).await?;
    println!(
        "{} {}",
        if locked { "Locked" } else { "Unlocked" },
        playbook.filename
    );
    Ok(())
}
