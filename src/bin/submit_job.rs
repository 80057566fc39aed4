//! Operator CLI (A4 in SPEC_FULL.md): push a synthetic job envelope onto
//! the inbound Redis queue, or just validate one against the v1 schema
//! without touching Redis. Grounded on readur's `src/bin/enqueue_pending_ocr.rs`
//! for the shape of a small standalone maintenance binary in this corpus.

use clap::Parser;
use serde_json::json;

use jarvis_ocr_worker::queue::{JobQueue, RedisJobQueue};
use jarvis_ocr_worker::validator;

#[derive(Parser)]
#[command(name = "submit_job", about = "Submit or validate a jarvis-ocr-worker job envelope")]
struct Args {
    /// Path to a JSON file containing the job envelope. Reads stdin if omitted.
    #[arg(long)]
    file: Option<String>,

    /// Only validate the envelope; do not publish it.
    #[arg(long)]
    validate_only: bool,

    /// Redis connection URL (ignored with --validate-only).
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Destination queue (ignored with --validate-only).
    #[arg(long, env = "OCR_JOB_QUEUE", default_value = "jarvis.ocr.jobs")]
    queue: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let raw_text = match &args.file {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let raw: serde_json::Value = serde_json::from_str(&raw_text)?;

    let envelope = validator::validate(&raw).map_err(|e| anyhow::anyhow!("envelope failed validation: {}", e.reason))?;
    println!(
        "{}",
        json!({"valid": true, "job_id": envelope.job_id, "image_count": envelope.payload.image_refs.len()})
    );

    if args.validate_only {
        return Ok(());
    }

    let queue = RedisJobQueue::connect(&args.redis_url).await?;
    queue.publish(&args.queue, &raw, false).await?;
    println!("published job {} to {}", envelope.job_id, args.queue);

    Ok(())
}
