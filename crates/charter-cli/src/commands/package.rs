//! Package command - create distributable archives

use charter_core::LoadedChart;
use charter_core::archive::pack_directory;
use console::style;
use std::path::Path;

use crate::error::Result;
use crate::util::format_size;

pub fn run(path: &Path, output: &Path) -> Result<()> {
    let chart = LoadedChart::load(path)?;
    let archive_name = format!("{}-{}.tgz", chart.name(), chart.version());

    println!(
        "{} {} v{}",
        style("Packaging").cyan().bold(),
        chart.name(),
        chart.version()
    );

    let bytes = pack_directory(&chart.root)?;
    std::fs::create_dir_all(output)?;
    let output_path = output.join(&archive_name);
    std::fs::write(&output_path, &bytes)?;

    println!(
        "  {} {}",
        style("Created").green().bold(),
        output_path.display()
    );
    println!("  {} {}", style("Size").dim(), format_size(bytes.len() as u64));
    Ok(())
}
