//! Template command - render a chart tree without a cluster

use charter_kube::{ChartOptions, ExecOptions};
use std::io::Write;
use std::path::Path;

use super::Session;
use crate::error::Result;

pub async fn run(
    config: Option<&Path>,
    chart: &str,
    namespace: Option<&str>,
    set: &[String],
) -> Result<()> {
    let session = Session::open(config)?;
    let chart = session
        .load_chart(chart, namespace, set, ChartOptions::default())
        .await?;

    let stream = chart.template(&ExecOptions::default()).await?;
    let mut stdout = std::io::stdout().lock();
    stream.encode_to(&mut stdout)?;
    stdout.flush()?;
    Ok(())
}
