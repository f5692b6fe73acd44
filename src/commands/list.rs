//! Registry listing

use anyhow::Result;
use colored::Colorize;
use reconcile::{Category, Parameter, Value, Volatility};
use serde::Serialize;

use crate::Context;
use crate::cli::ViewArgs;
use crate::engine::{self, Session};
use crate::ui;

#[derive(Debug, Serialize)]
struct ListEntry<'a> {
    id: &'a str,
    category: Category,
    description: &'a str,
    target: String,
    desired: &'a Value,
    default: &'a Value,
    optional: bool,
    volatility: Volatility,
    persistence: &'static str,
}

impl<'a> From<&'a Parameter> for ListEntry<'a> {
    fn from(p: &'a Parameter) -> Self {
        Self {
            id: &p.id,
            category: p.category,
            description: &p.description,
            target: p.target.location(),
            desired: &p.desired_value,
            default: &p.default_value,
            optional: p.optional,
            volatility: p.volatility,
            persistence: p.mechanism.family(),
        }
    }
}

pub fn run(ctx: &Context, args: ViewArgs) -> Result<()> {
    let session = Session::load(ctx)?;
    let selected = engine::select(&session.registry, &args.select)?;

    if args.json {
        let entries: Vec<ListEntry> = selected.iter().map(|p| ListEntry::from(*p)).collect();
        return ui::json(&entries);
    }

    ui::header(&format!("Parameters ({})", selected.len()));

    for category in Category::ALL {
        let in_category: Vec<&&Parameter> =
            selected.iter().filter(|p| p.category == category).collect();
        if in_category.is_empty() {
            continue;
        }
        ui::section(category.as_str());
        for p in in_category {
            let optional = if p.optional { " (optional)" } else { "" };
            println!(
                "  {} {} → {}  {}{}",
                ui::fit(&p.id, 34),
                p.default_value.to_string().dimmed(),
                p.desired_value.to_string().green(),
                format!("[{}]", p.mechanism.family()).dimmed(),
                optional.dimmed()
            );
            if ctx.verbose > 0 {
                ui::kv("description", &p.description);
                ui::kv("target", &p.target.location());
            }
        }
    }

    Ok(())
}
