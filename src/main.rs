//! Inference router entry point.
//!
//! Initialises all pipeline components from environment configuration and
//! runs an interactive REPL loop. Press Ctrl+C or type `/quit` to exit.

use std::io::{self, BufRead, Write};

use inference_router::config::load_config;
use inference_router::pipeline::Pipeline;
use inference_router::types::ChatRequest;

#[tokio::main]
async fn main() {
    // Structured logging — default level WARN to keep REPL output clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    // Load configuration from .env / system environment.
    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Please check your .env file for provider credentials and URLs.");
            std::process::exit(1);
        }
    };

    println!("Inference router starting...");
    println!(
        "   Preferred provider: {}",
        config.preferred_provider.as_deref().unwrap_or("local (default)")
    );
    println!("   Local endpoint:     {}", config.local_base_url);

    let pipeline = Pipeline::new(&config);
    let session_id = uuid::Uuid::new_v4().to_string();

    println!("Type your message (Ctrl+C or /quit to exit)\n");

    let stdin = io::stdin();
    loop {
        print!("You: ");
        io::stdout().flush().unwrap_or_default();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "/quit" || input == "/exit" {
                    break;
                }

                let response = pipeline
                    .handle(ChatRequest {
                        message: input.to_string(),
                        user_id: "repl".to_string(),
                        session_id: Some(session_id.clone()),
                        mode: None,
                    })
                    .await;

                if response.success {
                    println!("\nAssistant: {}\n", response.response);
                    if let Some(provider) = &response.metadata.provider {
                        println!(
                            "   [{} | {} ms | cache_hit: {}]\n",
                            provider,
                            response.metadata.response_time_ms,
                            response.metadata.cache_hit.unwrap_or(false)
                        );
                    }
                } else {
                    let detail = response
                        .error
                        .unwrap_or_else(|| "unknown error".to_string());
                    if response.response.is_empty() {
                        eprintln!("\nError: {}\n", detail);
                    } else {
                        // Degraded answer assembled from retrieved content.
                        println!("\nAssistant (degraded): {}\n", response.response);
                        eprintln!("   [{}]\n", detail);
                    }
                }
            }
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }

    pipeline.shutdown();
    println!("\nGoodbye!");
}
