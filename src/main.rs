use std::sync::Arc;

use daybrief_lib::error::ExecutionError;
use daybrief_lib::services;
use daybrief_lib::state::{load_config, AppState};

const USAGE: &str = "usage: daybrief [run | generate | latest]";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = dispatch(std::env::args().nth(1).as_deref()).await {
        log::error!("{}", e);
        eprintln!("{}\n{}", e, e.recovery_suggestion());
        std::process::exit(1);
    }
}

async fn dispatch(command: Option<&str>) -> Result<(), ExecutionError> {
    let state = Arc::new(AppState::new(load_config()?)?);
    match command {
        None | Some("run") => {
            daybrief_lib::run(state).await;
            Ok(())
        }
        Some("generate") => generate(&state).await,
        Some("latest") => latest(&state).await,
        Some(other) => Err(ExecutionError::ConfigurationError(format!(
            "Unknown command '{other}'. {USAGE}"
        ))),
    }
}

/// One manual run, streaming progress frames to stdout.
async fn generate(state: &Arc<AppState>) -> Result<(), ExecutionError> {
    let session_id = format!("cli-{}", chrono::Utc::now().timestamp_millis());
    let mut stream = services::subscribe_progress(state, &session_id);
    let printer = tokio::spawn(async move {
        while let Some(frame) = stream.next_frame().await {
            print!("{frame}");
        }
    });

    let result = services::generate_briefing(state, "cli", Some(session_id)).await;
    if let Err(ExecutionError::RateLimited { .. }) = &result {
        // Nothing ran, so no terminal frame will arrive
        printer.abort();
    } else if printer.await.is_err() {
        log::warn!("Progress printer stopped early");
    }
    let id = result?;
    println!("Briefing {id} ready");
    Ok(())
}

async fn latest(state: &AppState) -> Result<(), ExecutionError> {
    match services::get_latest_briefing_detail(state).await? {
        Some(detail) => {
            let json = serde_json::to_string_pretty(&detail)
                .map_err(|e| ExecutionError::IoError(format!("Serialize error: {e}")))?;
            println!("{json}");
        }
        None => println!("No briefings yet"),
    }
    Ok(())
}
