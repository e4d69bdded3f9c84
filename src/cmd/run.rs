//! Playbook run commands.

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};

use ensemble::catalog::{PlaybookRun, RunMode, RunResult, RunState};
use ensemble::exec::ProcessExecutor;
use ensemble::runner::Runner;
use ensemble::runner::report::RunReport;

use super::{Context, format_time};

/// Start a run and wait for it. Ctrl-C interrupts the playbook; the run is
/// still recorded.
pub async fn cmd_run(ctx: &Context, playbook: &str, mode: RunMode, user: &str) -> Result<()> {
    let playbook = ctx.playbook(playbook).await?;
    let project = ctx
        .catalog
        .get_project(&playbook.project_id)
        .await?
        .with_context(|| format!("Project {} not found", playbook.project_id))?;

    let runner = Runner::new(
        ctx.config.runner(),
        ctx.catalog.clone(),
        Arc::new(ProcessExecutor),
    );
    let launched = runner.run(&project, &playbook, mode, user).await?;
    let run_id = launched.run.id.clone();
    println!(
        "{} {} in {} mode ({})",
        console::style("Running").bold().cyan(),
        playbook.filename,
        mode,
        run_id
    );

    let wait = launched.wait();
    tokio::pin!(wait);
    let finished = tokio::select! {
        finished = &mut wait => finished?,
        _ = tokio::signal::ctrl_c() => {
            println!("{}", console::style("Interrupting...").yellow());
            runner.shutdown().await;
            wait.await?
        }
    };

    let result = ctx.catalog.get_run_result(&finished.id).await?;
    if let Some(result) = &result {
        print_result(result, false);
    }
    print_run(&finished);
    if finished.result != RunState::Success {
        bail!("Run {} failed", finished.id);
    }
    Ok(())
}

pub async fn cmd_runs(ctx: &Context, playbook: &str) -> Result<()> {
    let playbook = ctx.playbook(playbook).await?;
    let runs = ctx.catalog.list_runs(&playbook.id).await?;
    if runs.is_empty() {
        println!("No runs of {}.", playbook.filename);
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

pub async fn cmd_result(ctx: &Context, run: &str, raw: bool) -> Result<()> {
    let run = ctx
        .catalog
        .get_run(run)
        .await?
        .with_context(|| format!("Run '{}' not found", run))?;
    print_run(&run);
    match ctx.catalog.get_run_result(&run.id).await? {
        Some(result) => print_result(&result, raw),
        None if run.result == RunState::Running => println!("Run is still in progress."),
        None => println!("No output was recorded."),
    }
    Ok(())
}

fn print_run(run: &PlaybookRun) {
    let state = match run.result {
        RunState::Running => console::style(run.result.as_str()).cyan(),
        RunState::Success => console::style(run.result.as_str()).green(),
        RunState::Failure => console::style(run.result.as_str()).red(),
    };
    let finished = run
        .finish_time
        .as_ref()
        .map(format_time)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  {:<8} {:<7}  {} → {}  by {}  inventory {}{}",
        run.id,
        state,
        run.mode.as_str(),
        format_time(&run.start_time),
        finished,
        run.user_id,
        run.inventory_file,
        if run.variables_file.is_empty() {
            String::new()
        } else {
            format!(", variables {}", run.variables_file)
        }
    );
}

/// Recap from the JSON callback when the output is one, raw text otherwise.
fn print_result(result: &RunResult, raw: bool) {
    let report = if raw {
        None
    } else {
        RunReport::parse(&result.output).ok()
    };
    match report {
        Some(report) => {
            for (play, task, host, message) in report.failed_tasks() {
                println!(
                    "{} [{}] {} on {}: {}",
                    console::style("FAILED").red().bold(),
                    play,
                    task,
                    host,
                    message
                );
            }
            print!("{}", report.recap());
        }
        None => print!("{}", result.output),
    }
    if !result.error.is_empty() {
        eprint!("{}", result.error);
    }
}
