mod bbox;
mod config;
mod fetch;
mod ndvi;
mod pipeline;
mod raster;
mod region;
mod tiling;

use std::path::Path;

use config::Config;
use fetch::HttpImageryClient;
use pipeline::TilePipeline;
use region::Region;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/config/pipeline.json".to_string());

    println!("Starting NDVI tile processing...");

    let config = Config::from_file(&config_path)?;
    let regions = Region::from_file(config.regions_file())?;

    let client = HttpImageryClient::new(config.imagery())?;
    let pipeline = TilePipeline::new(client, config.clone());

    let mut total_done = 0;
    let mut total_failed = 0;

    for region in &regions {
        let report = pipeline.run(region)?;

        println!(
            "Region {} ({}): {} tiles DONE, {} tiles FAILED",
            report.region_id,
            report.region_name,
            report.done_count(),
            report.failed_count()
        );

        for failure in report.failures() {
            println!(
                "  ✗ tile {} [{}]: {}",
                failure.key,
                failure.error_category.as_deref().unwrap_or("unknown"),
                failure.error_detail.as_deref().unwrap_or("no detail")
            );
        }

        total_done += report.done_count();
        total_failed += report.failed_count();

        let report_path = report.write_json(Path::new(config.output_directory()))?;
        println!("  Report written to {}", report_path.display());
    }

    println!(
        "Processed {} region(s): {} tiles DONE, {} tiles FAILED",
        regions.len(),
        total_done,
        total_failed
    );

    Ok(())
}
