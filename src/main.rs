use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use container_autoupdate::{
    api_docker::DockerRuntime,
    check_container, load_run_options,
    logging::{init_logging, LoggingConfig, Secrets},
    Outcome, UpdateError, UpdateRequest,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Container to check for a new image
    #[arg(short, long)]
    container: String,
    /// Replace the container if it is outdated
    #[arg(short, long)]
    update: bool,
    /// The image tag to check against
    #[arg(short, long, default_value_t = String::from("latest"))]
    tag: String,
    /// JSON file of extra arguments for the recreated container, see
    /// `resources/docker-env.example.json`
    #[arg(short, long)]
    envfile: Option<PathBuf>,
    /// YAML logging configuration, see `resources/logging_config.yaml`
    #[arg(long, env = "AUTOUPDATE_LOG_CONFIG")]
    log_config: Option<PathBuf>,
    /// Seconds to wait for the old container to stop before it is killed
    #[arg(long)]
    stop_timeout: Option<i64>,
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,
    #[arg(long, env = "TELEGRAM_CHAT_ID", hide_env_values = true)]
    telegram_chat_id: Option<String>,
}

async fn run(args: &Args) -> Result<Outcome, UpdateError> {
    // read before touching the container so a bad file never leaves it half
    // replaced
    let run_options = load_run_options(args.envfile.as_deref()).await?;
    let runtime = DockerRuntime::connect()
        .await
        .map_err(|cause| UpdateError::Runtime { cause })?
        .with_stop_timeout(args.stop_timeout);

    let request = UpdateRequest::new(&args.container)
        .tag(&args.tag)
        .update(args.update)
        .run_options(run_options);
    check_container(&runtime, &request).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let logging_config = match LoggingConfig::load(args.log_config.as_deref()).await {
        Ok(logging_config) => logging_config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE
        }
    };
    let secrets = Secrets {
        telegram_token: args.telegram_token.clone(),
        telegram_chat_id: args.telegram_chat_id.clone(),
    };
    let logging = match init_logging(&logging_config, &secrets) {
        Ok(logging) => logging,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE
        }
    };

    let exit_code = match run(&args).await {
        Ok(Outcome::UpToDate { container }) => {
            info!("container {} is up-to-date", container.name);
            ExitCode::SUCCESS
        }
        Ok(Outcome::Outdated { .. }) => ExitCode::SUCCESS,
        Ok(Outcome::Updated { container, image }) => {
            info!(
                "container {} updated, now running on {}",
                container.name, image.reference
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(container.name = %args.container, "{err}");
            ExitCode::from(err.exit_code())
        }
    };

    logging.shutdown().await;
    exit_code
}
