use repo_conformance::config::AppConfig;
use repo_conformance::run_conformance;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Default to Info, RUST_LOG overrides
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    eprintln!("repo-conformance: metadata repository conformance suite");

    let config = AppConfig::load()?;
    eprintln!(
        "Configuration loaded: page_size={} instances_per_set={} poll={}ms x {}",
        config.run.page_size,
        config.run.instances_per_set,
        config.run.poll_interval_ms,
        config.run.poll_max_attempts
    );

    let report = run_conformance(&config).await?;
    println!("{}", serde_json::to_string_pretty(&report.to_json())?);

    if !report.all_passed() {
        eprintln!(
            "Conformance run failed: {} assertion(s) failed, {} test case(s) aborted",
            report.count(repo_conformance::suite::Outcome::Failed),
            report.aborts.len()
        );
        std::process::exit(1);
    }
    Ok(())
}
