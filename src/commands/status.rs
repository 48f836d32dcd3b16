use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::cli::StatusArgs;
use crate::commands;
use crate::ui;

pub fn run(ctx: &Context, args: &StatusArgs) -> Result<()> {
    let file = commands::load_catalog(args.file.as_deref(), false)?;
    let reconciler = commands::reconciler(ctx, &file.settings)?;

    let version = reconciler.version();
    let strategy = reconciler.tag_strategy();

    if args.json {
        let out = serde_json::json!({
            "version": version,
            "tag_support": reconciler.tag_support(),
            "strategy": strategy,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    ui::header("RabbitMQ Status");
    match version {
        Some(v) => ui::kv("Version", &v.to_string().bold().to_string()),
        None => ui::kv("Version", &"unknown".yellow().to_string()),
    }
    ui::kv("User tags", &ui::yes_no(reconciler.tag_support()).to_string());
    ui::kv("Strategy", &strategy.to_string());

    if version.is_none() && !ctx.quiet {
        println!();
        ui::warn("Could not read the broker version; assuming no tag support");
        ui::dim("Is the node running? Try `rabbitsync wait` or -vv for details");
    }

    println!();
    Ok(())
}
