use anyhow::Result;

use knowledgeops_core::orchestrator::QueryRequest;

use crate::config::Config;
use crate::services::Services;

/// Answer a question from the command line.
pub async fn run_query(
    config: &Config,
    question: &str,
    max_results: Option<usize>,
    no_rag: bool,
) -> Result<()> {
    let services = Services::build(config.clone()).await?;

    let mut request = QueryRequest::new(question);
    request.max_results = max_results;
    request.use_rag = !no_rag;
    request.session_id = "cli".to_string();

    let outcome = services.orchestrator.answer(&request).await;
    services.close().await;
    let outcome = outcome?;

    println!("{}", outcome.result.answer);
    println!();

    if outcome.result.sources.is_empty() {
        println!("Sources: none");
    } else {
        println!("Sources:");
        for (i, source) in outcome.result.sources.iter().enumerate() {
            let filename = source
                .metadata
                .get("filename")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let chunk = source
                .metadata
                .get("chunk_index")
                .and_then(|v| v.as_u64())
                .map(|c| format!(" #{}", c))
                .unwrap_or_default();
            println!("{}. [{:.2}] {}{}", i + 1, source.score, filename, chunk);
        }
    }

    println!();
    println!("Model: {}", outcome.result.model);
    if let Some(err) = &outcome.result.error {
        println!("Note: generation backend failed ({})", err);
    }
    Ok(())
}
