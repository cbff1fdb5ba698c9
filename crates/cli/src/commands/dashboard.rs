use std::path::Path;

use dune_client::{export_config, Dashboard, DashboardSource};

use super::{CmdResult, Context};
use crate::OutputFormat;

pub(crate) fn cmd_show(ctx: &Context, config: &Path) -> CmdResult {
    let dashboard = Dashboard::from_file(config)?;
    match ctx.output {
        OutputFormat::Text => println!("{}", dashboard),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&dashboard.to_config())?)
        }
    }
    Ok(())
}

pub(crate) fn cmd_refresh(ctx: &Context, config: &Path) -> CmdResult {
    let mut client = ctx.connect()?;
    let dashboard = client.load_dashboard(&DashboardSource::File(config.to_path_buf()))?;
    client.refresh_dashboard(&dashboard)?;

    match ctx.output {
        OutputFormat::Text => {
            if !ctx.quiet {
                println!("Refreshed {}", dashboard);
            }
        }
        OutputFormat::Json => {
            let ids: Vec<u64> = dashboard.queries().iter().map(|q| q.query_id()).collect();
            println!(
                "{}",
                serde_json::json!({ "dashboard": dashboard.name(), "refreshed": ids })
            );
        }
    }
    Ok(())
}

pub(crate) fn cmd_export(ctx: &Context, config: &Path, out: &Path) -> CmdResult {
    let dashboard = Dashboard::from_file(config)?;
    write_export(ctx, &dashboard, out)
}

pub(crate) fn cmd_pull(ctx: &Context, owner: &str, slug: &str, out: &Path) -> CmdResult {
    let mut client = ctx.connect()?;
    let dashboard = client.load_dashboard(&DashboardSource::Remote {
        owner: owner.to_string(),
        slug: slug.to_string(),
    })?;
    write_export(ctx, &dashboard, out)
}

fn write_export(ctx: &Context, dashboard: &Dashboard, out: &Path) -> CmdResult {
    let manifest = export_config(dashboard, out)?;
    match ctx.output {
        OutputFormat::Text => {
            ctx.note(&format!(
                "exported {} queries of \"{}\"",
                dashboard.queries().len(),
                dashboard.name()
            ));
            println!("{}", manifest.display());
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "manifest": manifest.display().to_string(),
                "queries": dashboard.queries().len(),
            })
        ),
    }
    Ok(())
}
