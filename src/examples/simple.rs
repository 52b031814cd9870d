//! Simple example of using proxy-quality-hunter as a library.

use proxy_quality_hunter::{Acquisition, AcquisitionConfig, Progress, ProgressReporter, Settings};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // WEBSHARE_TOKEN, WEBSHARE_PLAN_ID and the SOCKS credentials come from the
    // environment or a .env file
    let settings = Settings::from_env()?;

    let config = AcquisitionConfig::builder()
        .asn(6079)
        .max_attempts(3)
        // the provider is usually faster than the default settle delay
        .settle_delay(Duration::from_secs(3))
        .output_dir("reports")
        .build();

    let acquisition = Acquisition::from_settings(&settings, &config)?;

    let reporter = ProgressReporter::new(|step, total, event: &Progress| {
        println!("[{}/{}] {}", step, total, event);
    });

    match acquisition.run(config.max_attempts, config.asn, &reporter).await {
        Ok(outcome) => println!("Accepted {} -> {}", outcome.ip, outcome.socks_url),
        Err(e) => println!("No IP accepted: {}", e),
    }

    println!("{} progress events recorded", reporter.history().len());

    Ok(())
}
