use std::time::Instant;
use zorkai::{ChatMessage, ChatRequest, ErrorKind, Gateway, GatewayConfig};

/// Send one short probe request and report what happened.
pub async fn run_doctor(config: GatewayConfig, model: &str) -> anyhow::Result<()> {
    println!("Endpoint:   {}", config.base_url);
    println!(
        "Policy:     {} retries, timeout {:?}, breaker {}",
        config.retry.max_retries,
        config.retry.timeout,
        if config.retry.circuit_breaker_enabled { "enabled" } else { "disabled" }
    );

    let mut gateway = Gateway::new(config)?;
    let request = ChatRequest::new(
        model,
        vec![ChatMessage::user("Reply with the single word: pong")],
    )
    .with_max_tokens(16);

    println!("\n📋 Checking {}...", model);
    let started = Instant::now();
    match gateway.complete(&request).await {
        Ok(response) if response.is_empty() => {
            println!("  Completion: ⚠️  empty content ({:.2?})", started.elapsed());
        }
        Ok(response) => {
            println!("  Completion: ✅ {:?} ({:.2?})", response.content, started.elapsed());
            if let Some(usage) = &response.usage {
                println!("  Usage:      {}", serde_json::Value::Object(usage.clone()));
            }
        }
        Err(err) => {
            let hint = match err.last_cause() {
                ErrorKind::NonRetryable(_) => "request rejected; check api key, model name and parameters",
                ErrorKind::ExtractionFailure(_) => "unrecognized response shape",
                ErrorKind::CircuitOpen(_) => "breaker is protecting the endpoint",
                _ => "endpoint unavailable",
            };
            println!("  Completion: ❌ {} ({})", err, hint);
        }
    }
    println!(
        "  Breaker:    {} (failures: {})",
        gateway.circuit_state(),
        gateway.breaker().failure_count()
    );

    Ok(())
}
