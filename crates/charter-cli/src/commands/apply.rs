//! Apply command - install or update a chart tree

use charter_kube::{ChartOptions, ExecOptions, ProgressNode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{Session, Target, interruptible};
use crate::display::{TerminalProgress, print_done, print_operations};
use crate::error::Result;

pub struct ApplyArgs<'a> {
    pub chart: &'a str,
    pub namespace: Option<&'a str>,
    pub set: &'a [String],
    pub skip_packaging: bool,
    pub timeout: Option<Duration>,
    pub in_memory: bool,
}

pub async fn run(config: Option<&Path>, args: ApplyArgs<'_>) -> Result<()> {
    let session = Session::open(config)?;
    let options = if args.skip_packaging {
        ChartOptions::default().skip_packaging()
    } else {
        ChartOptions::default()
    };
    let mut chart = session
        .load_chart(args.chart, args.namespace, args.set, options)
        .await?;

    let progress = Arc::new(TerminalProgress::new("Applying", chart.name()));
    let target = Target::connect(
        Arc::clone(&session.settings),
        chart.namespace(),
        ProgressNode::root(progress.clone()),
        args.in_memory,
    )
    .await?;
    let opts = ExecOptions::new(interruptible(args.timeout));

    if let Err(err) = chart.apply(target.executor(), &opts).await {
        progress.abandon();
        return Err(err.into());
    }
    progress.finish("done");

    print_done(
        "Applied",
        chart.name(),
        &chart.version().to_string(),
        chart.namespace(),
    );
    if let Some(memory) = target.in_memory() {
        print_operations(&memory.operations());
    }
    Ok(())
}
