/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use timeline_protocol::{ActivityResponse, PageResponse};

/// Registers `TIMELINE_USER`, posts one activity for it and prints its feed.
#[tokio::main]
async fn main() -> Result<()> {
    let user = std::env::var("TIMELINE_USER").unwrap_or_else(|_| "alice".to_string());
    let provider = std::env::var("TIMELINE_PROVIDER").unwrap_or_else(|_| "organization".to_string());
    let base_url = std::env::var("TIMELINE_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8788".to_string());
    let token = std::env::var("TIMELINE_INTERNAL_TOKEN").unwrap_or_default();
    let content = std::env::var("TIMELINE_CONTENT").unwrap_or_else(|_| "Hello from the timeline".to_string());

    let base = base_url.trim_end_matches('/');
    let who = format!("{}/{}", urlencoding::encode(&provider), urlencoding::encode(&user));
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{base}/_timeline/identities/{who}"))
        .header("X-Timeline-Internal", &token)
        .send()
        .await
        .context("register identity")?;
    if !resp.status().is_success() {
        let status = resp.status();
        anyhow::bail!("identity rejected: {} {}", status, resp.text().await.unwrap_or_default());
    }

    let activity = json!({
      "owner": {"provider": provider, "remote_id": user},
      "body": {"type": "Note", "content": content}
    });
    let resp = client
        .post(format!("{base}/_timeline/activities"))
        .header(CONTENT_TYPE, "application/json")
        .header("X-Timeline-Internal", &token)
        .json(&activity)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("activity rejected: {} {}", status, resp.text().await.unwrap_or_default());
    }
    let created: ActivityResponse = resp.json().await.context("decode activity response")?;
    println!(
        "ok: {} {} (applied={}, failed={})",
        status, created.activity.id, created.fanout.applied, created.fanout.failed
    );

    let page: PageResponse = client
        .get(format!("{base}/_timeline/streams/{who}/feed?limit=20"))
        .header("X-Timeline-Internal", &token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("decode feed")?;
    for id in page.items {
        println!("{id}");
    }
    Ok(())
}
