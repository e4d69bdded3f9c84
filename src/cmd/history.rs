//! Sync history command.

use anyhow::Result;

use super::{Context, format_time};

pub async fn cmd_history(ctx: &Context, project: &str, log: bool) -> Result<()> {
    let project = ctx.project(project).await?;
    let updates = ctx.catalog.list_project_updates(&project.id).await?;
    if updates.is_empty() {
        println!("{} has never been synced.", project.name);
        return Ok(());
    }
    for update in updates {
        let status = if update.success {
            console::style("ok").green()
        } else {
            console::style("failed").red()
        };
        println!("{}  {:<6}  {}", format_time(&update.date), status, update.revision);
        if log {
            for line in update.log.lines() {
                println!("    {}", line);
            }
            println!();
        }
    }
    Ok(())
}
