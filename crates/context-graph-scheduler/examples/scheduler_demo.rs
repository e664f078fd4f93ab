//! Micro-batching demo with a simulated embedding model.
//!
//! Run with: cargo run -p context-graph-scheduler --example scheduler_demo [config.toml]
//!
//! Fires concurrent single-text requests at the scheduler and prints how they
//! were grouped. Settings come from the optional TOML file, then `SCHEDULER_*`
//! environment variables.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use context_graph_scheduler::{
    BatchInference, BatchOutcomes, Request, Scheduler, SchedulerConfig, SchedulerResult,
};

const CALLERS: usize = 100;

/// Pretends to embed text: fixed launch cost plus a per-item cost.
struct SimulatedEmbedder {
    launch_cost: Duration,
    per_item_cost: Duration,
}

#[async_trait]
impl BatchInference for SimulatedEmbedder {
    type Payload = String;
    type Output = Vec<f32>;

    async fn process_batch(
        &self,
        requests: Vec<Request<String>>,
    ) -> SchedulerResult<BatchOutcomes<Vec<f32>>> {
        let cost = self.launch_cost + self.per_item_cost * requests.len() as u32;
        tokio::time::sleep(cost).await;

        Ok(requests
            .into_iter()
            .map(|r| {
                let len = r.payload.len() as f32;
                let vowels = r.payload.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
                (r.id, Ok(vec![len, vowels, vowels / len.max(1.0)]))
            })
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("context_graph_scheduler=info".parse()?),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    }
    .with_env_overrides();

    println!("Config: {:?}", config);

    let model = Arc::new(SimulatedEmbedder {
        launch_cost: Duration::from_millis(8),
        per_item_cost: Duration::from_micros(250),
    });
    let scheduler = Arc::new(Scheduler::new(model, config)?);
    scheduler.start()?;

    let started = Instant::now();
    let mut callers = Vec::with_capacity(CALLERS);
    for i in 0..CALLERS {
        let scheduler = Arc::clone(&scheduler);
        callers.push(tokio::spawn(async move {
            let text = format!("memory node {i} about causal context");
            scheduler.infer(text).await
        }));
    }

    let mut ok = 0usize;
    for caller in callers {
        match caller.await? {
            Ok(_) => ok += 1,
            Err(e) => eprintln!("request failed: {e}"),
        }
    }
    let elapsed = started.elapsed();

    scheduler.stop().await?;
    let stats = scheduler.stats();

    println!();
    println!(
        "Requests:        {ok}/{CALLERS} succeeded in {:.1} ms",
        elapsed.as_secs_f64() * 1000.0
    );
    println!("Batches:         {}", stats.batches_dispatched);
    println!("Avg batch size:  {:.2}", stats.avg_batch_size);
    println!("Avg queue wait:  {} us", stats.avg_wait_time_us);
    println!(
        "Triggers:        size={} window={} drain={}",
        stats.size_triggered, stats.window_triggered, stats.drain_triggered
    );
    Ok(())
}
