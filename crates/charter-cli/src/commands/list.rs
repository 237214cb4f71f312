//! List command - installed charts from their packaged records

use charter_kube::{ExecOptions, PackagedChart, ProgressNode};
use console::style;
use std::path::Path;
use std::sync::Arc;

use super::{Session, Target};
use crate::error::Result;

pub async fn run(
    config: Option<&Path>,
    namespace: Option<&str>,
    genus: Option<&str>,
    in_memory: bool,
) -> Result<()> {
    let session = Session::open(config)?;
    let namespace = namespace.unwrap_or(&session.settings.default_namespace);
    let target = Target::connect(
        Arc::clone(&session.settings),
        namespace,
        ProgressNode::default(),
        in_memory,
    )
    .await?;

    let mut records = PackagedChart::list(
        target.executor(),
        &session.settings,
        genus.unwrap_or_default(),
        &ExecOptions::default(),
    )
    .await?;

    if records.is_empty() {
        println!("No charts found in namespace {namespace}");
        return Ok(());
    }
    records.sort_by(|a, b| a.genus.cmp(&b.genus).then_with(|| a.name.cmp(&b.name)));

    let mut lines = table(&records).into_iter();
    if let Some(header) = lines.next() {
        println!("{}", style(header).bold());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Header plus one line per record
fn table(records: &[PackagedChart]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<30} {:<20} {:<20} {:<10} {}",
        "GENUS", "NAME", "NAMESPACE", "VERSION", "USERS"
    )];
    for record in records {
        lines.push(format!(
            "{:<30} {:<20} {:<20} {:<10} {}",
            record.genus,
            record.name,
            record.namespace,
            record.version,
            record.used_by.len()
        ));
    }
    lines
}
