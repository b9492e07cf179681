//! Latency and throughput benchmarks for a logkv server
//!
//! Every request uses its own connection, matching the one-exchange protocol.

use clap::Parser;
use logkv::Client;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Benchmark a running logkv server", long_about = None)]
struct Args {
    /// Address of the server
    #[arg(long, default_value = "127.0.0.1:12347")]
    server: String,

    /// Requests per sequential benchmark
    #[arg(long, default_value_t = 1000)]
    requests: usize,

    /// Concurrent clients for the parallel INSERT benchmark
    #[arg(long, default_value_t = 50)]
    concurrency: usize,

    /// Print results as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct BenchmarkResults {
    operation: String,
    total_operations: usize,
    duration_secs: f64,
    ops_per_second: f64,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    p99_latency_ms: f64,
}

impl BenchmarkResults {
    fn new(operation: String, total_operations: usize, duration: Duration, latencies: &mut [Duration]) -> Self {
        latencies.sort();

        let ops_per_second = total_operations as f64 / duration.as_secs_f64();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / latencies.len() as f64
        };

        let p95_index = (latencies.len() as f64 * 0.95) as usize;
        let p99_index = (latencies.len() as f64 * 0.99) as usize;

        let p95_latency_ms = latencies.get(p95_index).unwrap_or(&Duration::ZERO).as_secs_f64() * 1000.0;
        let p99_latency_ms = latencies.get(p99_index).unwrap_or(&Duration::ZERO).as_secs_f64() * 1000.0;

        Self {
            operation,
            total_operations,
            duration_secs: duration.as_secs_f64(),
            ops_per_second,
            avg_latency_ms,
            p95_latency_ms,
            p99_latency_ms,
        }
    }

    fn print(&self) {
        println!("=== {} ===", self.operation);
        println!("Total operations: {}", self.total_operations);
        println!("Duration: {:.2}s", self.duration_secs);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
        println!("Average latency: {:.3}ms", self.avg_latency_ms);
        println!("P95 latency: {:.3}ms", self.p95_latency_ms);
        println!("P99 latency: {:.3}ms", self.p99_latency_ms);
        println!();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client = Client::new(args.server.clone()).with_timeout(Duration::from_secs(10));

    if !args.json {
        println!("logkv benchmarks against {}", args.server);
        println!();
    }

    // Keys are namespaced per run so repeated runs are not shadowed by older records.
    let run_id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_millis();

    let results = vec![
        benchmark_insert(&client, run_id, args.requests).await?,
        benchmark_lookup(&client, run_id, args.requests).await?,
        benchmark_concurrent_insert(&client, run_id, args.concurrency, args.requests).await?,
    ];

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            result.print();
        }
    }

    Ok(())
}

async fn benchmark_insert(
    client: &Client,
    run_id: u128,
    num_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let mut latencies = Vec::with_capacity(num_operations);
    let start = Instant::now();

    for i in 0..num_operations {
        let op_start = Instant::now();
        client
            .insert(&format!("user{}_{}", run_id, i), &format!("pass{}", i))
            .await?;
        latencies.push(op_start.elapsed());
    }

    Ok(BenchmarkResults::new(
        "INSERT".to_string(),
        num_operations,
        start.elapsed(),
        &mut latencies,
    ))
}

/// Looks up the keys written by `benchmark_insert`
async fn benchmark_lookup(
    client: &Client,
    run_id: u128,
    num_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let mut latencies = Vec::with_capacity(num_operations);
    let start = Instant::now();

    for i in 0..num_operations {
        let op_start = Instant::now();
        let value = client.lookup(&format!("user{}_{}", run_id, i)).await?;
        latencies.push(op_start.elapsed());

        if value.as_deref() != Some(format!("pass{}", i).as_str()) {
            return Err(format!("unexpected value for user{}_{}: {:?}", run_id, i, value).into());
        }
    }

    Ok(BenchmarkResults::new(
        "LOOKUP".to_string(),
        num_operations,
        start.elapsed(),
        &mut latencies,
    ))
}

async fn benchmark_concurrent_insert(
    client: &Client,
    run_id: u128,
    num_clients: usize,
    total_operations: usize,
) -> Result<BenchmarkResults, Box<dyn std::error::Error>> {
    let num_clients = num_clients.max(1);
    let ops_per_client = total_operations / num_clients;
    let mut handles = Vec::with_capacity(num_clients);
    let mut all_latencies = Vec::with_capacity(num_clients * ops_per_client);

    let start = Instant::now();

    for client_id in 0..num_clients {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(ops_per_client);
            for i in 0..ops_per_client {
                let key = format!("concurrent{}_{}_{}", run_id, client_id, i);
                let op_start = Instant::now();
                client
                    .insert(&key, &format!("pass{}", i))
                    .await
                    .map_err(|e| format!("Insert error: {}", e))?;
                latencies.push(op_start.elapsed());
            }
            Ok::<Vec<Duration>, String>(latencies)
        }));
    }

    for handle in handles {
        let latencies = handle
            .await
            .map_err(|e| format!("Join error: {}", e))?
            .map_err(|e| format!("Task error: {}", e))?;
        all_latencies.extend(latencies);
    }

    Ok(BenchmarkResults::new(
        format!("Concurrent INSERT ({} clients)", num_clients),
        num_clients * ops_per_client,
        start.elapsed(),
        &mut all_latencies,
    ))
}
