//! Delete command - remove a chart tree in reverse order

use charter_kube::{ChartOptions, ExecOptions, ProgressNode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{Session, Target, interruptible};
use crate::display::{TerminalProgress, print_done, print_operations};
use crate::error::Result;

pub struct DeleteArgs<'a> {
    pub chart: &'a str,
    pub namespace: Option<&'a str>,
    pub recursive: bool,
    pub timeout: Option<Duration>,
    pub in_memory: bool,
}

pub async fn run(config: Option<&Path>, args: DeleteArgs<'_>) -> Result<()> {
    let session = Session::open(config)?;
    let mut chart = session
        .load_chart(args.chart, args.namespace, &[], ChartOptions::default())
        .await?;

    let progress = Arc::new(TerminalProgress::new("Deleting", chart.name()));
    let target = Target::connect(
        Arc::clone(&session.settings),
        chart.namespace(),
        ProgressNode::root(progress.clone()),
        args.in_memory,
    )
    .await?;
    let opts = ExecOptions::new(interruptible(args.timeout));

    if let Err(err) = chart.delete(target.executor(), &opts, args.recursive).await {
        progress.abandon();
        return Err(err.into());
    }
    progress.finish("done");

    print_done(
        "Deleted",
        chart.name(),
        &chart.version().to_string(),
        chart.namespace(),
    );
    if let Some(memory) = target.in_memory() {
        print_operations(&memory.operations());
    }
    Ok(())
}
