//! `analytics` and `subscription` commands

use activation_client::{AnalyticsSummary, HttpBackend};
use activation_core::ApiKey;
use anyhow::Result;

use crate::cli::AnalyticsArgs;
use crate::print_info;

pub async fn run(args: AnalyticsArgs, backend: &HttpBackend, key: &ApiKey) -> Result<()> {
    let records = backend.user_analytics(key).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let summary = AnalyticsSummary::from_records(&records);
    print_info(&format!(
        "{} requests, {} succeeded, {} failed ({:.1}% success)",
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.success_rate() * 100.0
    ));
    if let Some(last) = &summary.last_seen {
        println!("  Last request: {}", last);
    }
    for (endpoint, count) in summary.top_endpoints(args.top) {
        println!("  {:>6}  {}", count, endpoint);
    }
    for (status, count) in &summary.by_status {
        println!("  HTTP {}: {}", status, count);
    }
    Ok(())
}

pub async fn subscription(backend: &HttpBackend, key: &ApiKey) -> Result<()> {
    let subscription = backend.subscription(key).await?;
    print_info(&format!("Plan: {} ({})", subscription.plan, subscription.status));
    if let (Some(start), Some(end)) = (&subscription.start_date, &subscription.end_date) {
        println!("  Period: {} to {}", start, end);
    }
    for (name, value) in &subscription.usage_summary {
        println!("  {}: {}", name, value);
    }
    Ok(())
}
